use async_trait::async_trait;
use ems_polling::{
    PollTask, PollingError, TaskHandler, TaskOptions, TaskQueue, TokioTaskQueue,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// 前 `fail_times` 次失败（或挂起超时），之后成功。
struct FlakyHandler {
    attempts: AtomicU32,
    fail_times: u32,
    hang: bool,
    done: mpsc::UnboundedSender<&'static str>,
}

#[async_trait]
impl TaskHandler for FlakyHandler {
    async fn handle(&self, _task: &PollTask) -> Result<(), PollingError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_times {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            return Err(PollingError::Queue("transient".to_string()));
        }
        let _ = self.done.send("handled");
        Ok(())
    }

    async fn on_final_failure(&self, _task: &PollTask, _error: &PollingError) {
        let _ = self.done.send("final_failure");
    }
}

fn options(max_attempts: u32) -> TaskOptions {
    TaskOptions {
        timeout: Duration::from_millis(100),
        max_attempts,
        backoff: Duration::from_millis(10),
    }
}

fn handler(fail_times: u32, hang: bool) -> (Arc<FlakyHandler>, mpsc::UnboundedReceiver<&'static str>) {
    let (done, rx) = mpsc::unbounded_channel();
    (
        Arc::new(FlakyHandler {
            attempts: AtomicU32::new(0),
            fail_times,
            hang,
            done,
        }),
        rx,
    )
}

async fn next(rx: &mut mpsc::UnboundedReceiver<&'static str>) -> &'static str {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("handler signal")
        .expect("channel open")
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let (queue, worker) = TokioTaskQueue::new(options(3), 2);
    let (handler, mut rx) = handler(2, false);
    worker.spawn(handler.clone());

    queue
        .enqueue(PollTask::new("gw-1", "t-1"), Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(next(&mut rx).await, "handled");
    assert_eq!(handler.attempts.load(Ordering::SeqCst), 3);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let stats = queue.stats();
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.exhausted, 0);
}

#[tokio::test]
async fn exhausted_task_calls_final_failure_once() {
    let (queue, worker) = TokioTaskQueue::new(options(3), 2);
    let (handler, mut rx) = handler(u32::MAX, false);
    worker.spawn(handler.clone());

    queue
        .enqueue(PollTask::new("gw-1", "t-1"), Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(next(&mut rx).await, "final_failure");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(handler.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(queue.stats().exhausted, 1);
}

#[tokio::test]
async fn hung_attempt_times_out_and_is_retried() {
    let (queue, worker) = TokioTaskQueue::new(options(2), 1);
    let (handler, mut rx) = handler(1, true);
    worker.spawn(handler.clone());

    queue
        .enqueue(PollTask::new("gw-1", "t-1"), Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(next(&mut rx).await, "handled");
    assert_eq!(handler.attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn delayed_task_is_not_delivered_early() {
    let (queue, worker) = TokioTaskQueue::new(options(1), 1);
    let (handler, mut rx) = handler(0, false);
    worker.spawn(handler);

    queue
        .enqueue(PollTask::new("gw-1", "t-1"), Duration::from_millis(200))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(queue.stats().pending, 1);
    assert_eq!(next(&mut rx).await, "handled");
}
