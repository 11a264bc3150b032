//! 轮询任务队列
//!
//! `TaskQueue` 是调度器唯一依赖的队列接口：延迟入队 + 每任务超时/重试/退避配置 +
//! 最终失败回调。`TokioTaskQueue` 为进程内实现：
//!
//! ```text
//! enqueue(task, delay) ──sleep(delay)──► mpsc ──► QueueWorker ──Semaphore──► handler.handle()
//!                                                                  │ 超时 / 失败
//!                                                                  ├─► sleep(backoff) 后重试
//!                                                                  └─► 重试耗尽：handler.on_final_failure()
//! ```

use crate::error::PollingError;
use async_trait::async_trait;
use ems_telemetry::{record_task_exhausted, record_task_retried};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tracing::{error, info, warn};

/// 一次轮询任务。`lease_token` 与入队时获取的调度租约对应。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTask {
    pub task_id: String,
    pub gateway_id: String,
    pub lease_token: String,
    pub enqueued_at_ms: i64,
}

impl PollTask {
    pub fn new(gateway_id: impl Into<String>, lease_token: impl Into<String>) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            gateway_id: gateway_id.into(),
            lease_token: lease_token.into(),
            enqueued_at_ms: domain::now_epoch_ms(),
        }
    }
}

/// 每任务执行参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOptions {
    /// 单次尝试超时
    pub timeout: Duration,
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 固定退避
    pub backoff: Duration,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            backoff: Duration::from_secs(10),
        }
    }
}

impl TaskOptions {
    pub fn sanitized(mut self) -> Self {
        if self.max_attempts == 0 {
            self.max_attempts = 1;
        }
        if self.timeout.is_zero() {
            self.timeout = Duration::from_secs(1);
        }
        self
    }

    /// 一个任务从入队到最终结束的最长耗时（不含入队延迟）
    pub fn worst_case_duration(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        self.timeout * attempts + self.backoff * (attempts - 1)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("task queue is closed")]
    Closed,
}

/// 队列统计快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatsSnapshot {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub retried: u64,
    pub exhausted: u64,
}

#[derive(Default)]
struct QueueStats {
    pending: AtomicU64,
    running: AtomicU64,
    completed: AtomicU64,
    retried: AtomicU64,
    exhausted: AtomicU64,
}

impl QueueStats {
    fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            pending: self.pending.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

/// 任务队列接口。
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: PollTask, delay: Duration) -> Result<(), QueueError>;

    fn options(&self) -> TaskOptions;

    fn stats(&self) -> QueueStatsSnapshot;
}

/// 任务处理器。
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// 返回 Err 时由队列按配置重试
    async fn handle(&self, task: &PollTask) -> Result<(), PollingError>;

    /// 重试耗尽后调用一次，不得再抛出
    async fn on_final_failure(&self, task: &PollTask, error: &PollingError);
}

/// 进程内任务队列（tokio mpsc + 延迟投递）。
#[derive(Clone)]
pub struct TokioTaskQueue {
    sender: mpsc::UnboundedSender<PollTask>,
    options: TaskOptions,
    stats: Arc<QueueStats>,
}

/// 队列消费端，通过 `spawn` 启动工作池。
pub struct QueueWorker {
    receiver: mpsc::UnboundedReceiver<PollTask>,
    options: TaskOptions,
    stats: Arc<QueueStats>,
    concurrency: usize,
}

impl TokioTaskQueue {
    pub fn new(options: TaskOptions, concurrency: usize) -> (Self, QueueWorker) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let options = options.sanitized();
        let stats = Arc::new(QueueStats::default());
        (
            Self {
                sender,
                options,
                stats: stats.clone(),
            },
            QueueWorker {
                receiver,
                options,
                stats,
                concurrency: concurrency.max(1),
            },
        )
    }
}

#[async_trait]
impl TaskQueue for TokioTaskQueue {
    async fn enqueue(&self, task: PollTask, delay: Duration) -> Result<(), QueueError> {
        if self.sender.is_closed() {
            return Err(QueueError::Closed);
        }
        self.stats.pending.fetch_add(1, Ordering::Relaxed);
        if delay.is_zero() {
            return self.sender.send(task).map_err(|_| {
                self.stats.pending.fetch_sub(1, Ordering::Relaxed);
                QueueError::Closed
            });
        }
        let sender = self.sender.clone();
        let stats = self.stats.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = sender.send(task) {
                stats.pending.fetch_sub(1, Ordering::Relaxed);
                warn!(
                    target: "ems.polling",
                    gateway_id = %err.0.gateway_id,
                    task_id = %err.0.task_id,
                    "poll_task_dropped_queue_closed"
                );
            }
        });
        Ok(())
    }

    fn options(&self) -> TaskOptions {
        self.options
    }

    fn stats(&self) -> QueueStatsSnapshot {
        self.stats.snapshot()
    }
}

impl QueueWorker {
    /// 启动消费循环；所有发送端关闭后结束。
    pub fn spawn(self, handler: Arc<dyn TaskHandler>) -> tokio::task::JoinHandle<()> {
        let QueueWorker {
            mut receiver,
            options,
            stats,
            concurrency,
        } = self;
        tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(concurrency));
            info!(target: "ems.polling", concurrency, "poll_workers_started");
            while let Some(task) = receiver.recv().await {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                stats.pending.fetch_sub(1, Ordering::Relaxed);
                stats.running.fetch_add(1, Ordering::Relaxed);
                let handler = handler.clone();
                let stats = stats.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    run_with_retry(handler.as_ref(), &task, options, &stats).await;
                    stats.running.fetch_sub(1, Ordering::Relaxed);
                });
            }
            info!(target: "ems.polling", "poll_workers_stopped");
        })
    }
}

async fn run_with_retry(
    handler: &dyn TaskHandler,
    task: &PollTask,
    options: TaskOptions,
    stats: &QueueStats,
) {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout(options.timeout, handler.handle(task)).await {
            Ok(result) => result,
            Err(_) => Err(PollingError::Timeout(options.timeout)),
        };
        let err = match result {
            Ok(()) => {
                stats.completed.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(err) => err,
        };
        if attempt >= options.max_attempts {
            stats.exhausted.fetch_add(1, Ordering::Relaxed);
            record_task_exhausted();
            error!(
                target: "ems.polling",
                gateway_id = %task.gateway_id,
                task_id = %task.task_id,
                attempt,
                error = %err,
                "poll_task_exhausted"
            );
            handler.on_final_failure(task, &err).await;
            return;
        }
        stats.retried.fetch_add(1, Ordering::Relaxed);
        record_task_retried();
        warn!(
            target: "ems.polling",
            gateway_id = %task.gateway_id,
            task_id = %task.task_id,
            attempt,
            max_attempts = options.max_attempts,
            error = %err,
            "poll_task_retry"
        );
        if !options.backoff.is_zero() {
            tokio::time::sleep(options.backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_case_covers_all_attempts_and_backoff() {
        let options = TaskOptions::default();
        assert_eq!(options.worst_case_duration(), Duration::from_secs(200));
    }

    #[test]
    fn zero_attempts_is_clamped() {
        let options = TaskOptions {
            timeout: Duration::ZERO,
            max_attempts: 0,
            backoff: Duration::ZERO,
        }
        .sanitized();
        assert_eq!(options.max_attempts, 1);
        assert_eq!(options.timeout, Duration::from_secs(1));
    }
}
