mod trace;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use taskq_core::impls::TypedLiveness;
use taskq_core::{BoxError, QueueConfig, TaskBuilder, TaskError, TaskQueue, is_interrupted};
use tokio::runtime::Handle;
use tracing_subscriber::EnvFilter;

use crate::trace::{Trace, wait_done};

/// コールバックの owner（画面に相当）
struct Screen {
    title: &'static str,
    closed: AtomicBool,
}

impl Screen {
    fn new(title: &'static str) -> Arc<Self> {
        Arc::new(Self {
            title,
            closed: AtomicBool::new(false),
        })
    }
}

fn load_config() -> Result<QueueConfig, TaskError> {
    match std::env::var("TASKQ_CONFIG") {
        Ok(path) => {
            tracing::info!(path = %path, "loading queue config");
            QueueConfig::from_json_file(path)
        }
        Err(_) => Ok(QueueConfig::default()),
    }
}

/// serial lane に A / B / C を積み、コールバックが task ごとに混ざらないことを見る
async fn serial_scenario(queue: &TaskQueue, screen: &Arc<Screen>) -> Result<(), TaskError> {
    println!("[serial] {}", screen.title);
    let (trace, mut rx) = Trace::new();

    TaskBuilder::new()
        .work(|| {
            std::thread::sleep(Duration::from_millis(50));
            Ok::<_, BoxError>(1)
        })
        .owner(screen)
        .serial(true)
        .callbacks(trace.callbacks("A"))
        .start(queue)?;
    TaskBuilder::new()
        .work(|| Ok::<_, BoxError>(2))
        .owner(screen)
        .serial(true)
        .callbacks(trace.callbacks("B"))
        .start(queue)?;
    TaskBuilder::new()
        .work(|| Err::<i32, BoxError>("err".into()))
        .owner(screen)
        .serial(true)
        .callbacks(trace.callbacks("C"))
        .start(queue)?;

    wait_done(&mut rx, 3).await;
    println!("{}", serde_json::json!({ "trace": trace.lines() }));
    Ok(())
}

/// 画面を閉じたら、その画面が投入した task をまとめてキャンセルする
async fn cancel_group_demo(queue: &TaskQueue, screen: &Arc<Screen>, other: &Arc<Screen>) -> Result<(), TaskError> {
    println!("[cancel group] {} / {}", screen.title, other.title);
    let (trace, mut rx) = Trace::new();

    let poll = || {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !is_interrupted() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok::<_, BoxError>("polled")
    };
    for label in ["closing-1", "closing-2", "closing-3"] {
        TaskBuilder::new()
            .work(poll)
            .owner(screen)
            .callbacks(trace.callbacks(label))
            .start(queue)?;
    }
    TaskBuilder::new()
        .work(|| {
            std::thread::sleep(Duration::from_millis(30));
            Ok::<_, BoxError>("kept")
        })
        .owner(other)
        .callbacks(trace.callbacks("other"))
        .start(queue)?;

    tokio::time::sleep(Duration::from_millis(20)).await;
    println!("{}", queue.snapshot().to_json()?);

    screen.closed.store(true, Ordering::SeqCst);
    let cancelled = queue.cancel_group(screen);
    println!("  cancelled {cancelled} task(s)");

    wait_done(&mut rx, 4).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), TaskError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let queue = TaskQueue::builder()
        .config(load_config()?)
        .runtime(Handle::current())
        .liveness(TypedLiveness::<Screen, _>::new(|screen: &Screen| {
            !screen.closed.load(Ordering::SeqCst)
        }))
        .build()?;

    let home = Screen::new("home");
    let detail = Screen::new("detail");
    serial_scenario(&queue, &home).await?;
    cancel_group_demo(&queue, &detail, &home).await?;

    println!("{}", queue.snapshot().to_json()?);
    queue.shutdown();
    Ok(())
}
