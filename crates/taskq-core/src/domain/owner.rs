//! Owner handles.
//!
//! A task keeps only a non-owning handle to the object that requested it.
//! The handle carries the owner's short type name and an identity key taken
//! from the `Arc` allocation, so the cancellation group never depends on
//! `PartialEq` or `Hash` of a mutable owner.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

/// Type-erased owner as seen by liveness oracles.
pub type AnyOwner = dyn Any + Send + Sync;

/// Non-owning reference to a task owner.
#[derive(Clone)]
pub struct OwnerRef {
    type_name: &'static str,
    identity: usize,
    handle: Weak<AnyOwner>,
}

impl OwnerRef {
    pub fn new<O: Any + Send + Sync>(owner: &Arc<O>) -> Self {
        let identity = Arc::as_ptr(owner) as *const () as usize;
        let erased: Arc<AnyOwner> = owner.clone();
        Self {
            type_name: short_type_name(std::any::type_name::<O>()),
            identity,
            handle: Arc::downgrade(&erased),
        }
    }

    /// Cancellation group: `TypeName|identity-hex`.
    pub fn group(&self) -> String {
        format!("{}|{:x}", self.type_name, self.identity)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the owner while at least one strong reference is alive.
    pub fn upgrade(&self) -> Option<Arc<AnyOwner>> {
        self.handle.upgrade()
    }

    /// True once every strong reference to the owner has been dropped.
    pub fn is_released(&self) -> bool {
        self.handle.strong_count() == 0
    }
}

impl fmt::Debug for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerRef")
            .field("group", &self.group())
            .field("released", &self.is_released())
            .finish()
    }
}

fn short_type_name(full: &'static str) -> &'static str {
    // "my_app::screens::Detail<alloc::string::String>" -> "Detail"
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
