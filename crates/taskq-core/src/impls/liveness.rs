//! Default LivenessOracle implementations.

use std::any::Any;
use std::marker::PhantomData;

use crate::domain::AnyOwner;
use crate::ports::LivenessOracle;

/// Treats every owner as alive. Only the release of the owner's last strong
/// reference suppresses callbacks.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeAlive;

impl LivenessOracle for AssumeAlive {
    fn is_alive(&self, _owner: &AnyOwner) -> bool {
        true
    }
}

/// Checks owners of type `O` with a predicate; owners of any other type are
/// considered alive.
///
/// ```ignore
/// let oracle = TypedLiveness::new(|screen: &Screen| !screen.is_destroyed());
/// ```
pub struct TypedLiveness<O, F> {
    predicate: F,
    _marker: PhantomData<fn(&O)>,
}

impl<O, F> TypedLiveness<O, F>
where
    O: Any,
    F: Fn(&O) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            _marker: PhantomData,
        }
    }
}

impl<O, F> LivenessOracle for TypedLiveness<O, F>
where
    O: Any,
    F: Fn(&O) -> bool + Send + Sync,
{
    fn is_alive(&self, owner: &AnyOwner) -> bool {
        owner
            .downcast_ref::<O>()
            .is_none_or(|typed| (self.predicate)(typed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Screen {
        destroyed: AtomicBool,
    }

    struct Other;

    #[test]
    fn typed_oracle_consults_predicate_for_matching_type() {
        let oracle = TypedLiveness::new(|s: &Screen| !s.destroyed.load(Ordering::SeqCst));
        let screen = Screen {
            destroyed: AtomicBool::new(false),
        };

        assert!(oracle.is_alive(&screen));
        screen.destroyed.store(true, Ordering::SeqCst);
        assert!(!oracle.is_alive(&screen));
    }

    #[test]
    fn typed_oracle_treats_other_types_as_alive() {
        let oracle = TypedLiveness::new(|_: &Screen| false);
        assert!(oracle.is_alive(&Other));
    }

    #[test]
    fn closures_are_oracles() {
        let oracle = |_owner: &AnyOwner| false;
        assert!(!oracle.is_alive(&Other));
        assert!(AssumeAlive.is_alive(&Other));
    }
}
