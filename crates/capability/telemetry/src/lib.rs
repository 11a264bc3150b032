//! 追踪、请求 ID 生成与轮询指标。

use serde::Serialize;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 轮询指标快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub polls_started: u64,
    pub polls_succeeded: u64,
    pub polls_failed: u64,
    pub readings_good: u64,
    pub readings_bad: u64,
    pub readings_uncertain: u64,
    pub tasks_enqueued: u64,
    pub tasks_retried: u64,
    pub tasks_exhausted: u64,
    pub tasks_superseded: u64,
    pub lease_contentions: u64,
    pub auto_disables: u64,
    pub orphaned_leases_cleared: u64,
    pub poll_latency_ms_total: u64,
    pub poll_latency_ms_count: u64,
}

/// 轮询指标。
pub struct PollingMetrics {
    polls_started: AtomicU64,
    polls_succeeded: AtomicU64,
    polls_failed: AtomicU64,
    readings_good: AtomicU64,
    readings_bad: AtomicU64,
    readings_uncertain: AtomicU64,
    tasks_enqueued: AtomicU64,
    tasks_retried: AtomicU64,
    tasks_exhausted: AtomicU64,
    tasks_superseded: AtomicU64,
    lease_contentions: AtomicU64,
    auto_disables: AtomicU64,
    orphaned_leases_cleared: AtomicU64,
    poll_latency_ms_total: AtomicU64,
    poll_latency_ms_count: AtomicU64,
}

impl PollingMetrics {
    pub fn new() -> Self {
        Self {
            polls_started: AtomicU64::new(0),
            polls_succeeded: AtomicU64::new(0),
            polls_failed: AtomicU64::new(0),
            readings_good: AtomicU64::new(0),
            readings_bad: AtomicU64::new(0),
            readings_uncertain: AtomicU64::new(0),
            tasks_enqueued: AtomicU64::new(0),
            tasks_retried: AtomicU64::new(0),
            tasks_exhausted: AtomicU64::new(0),
            tasks_superseded: AtomicU64::new(0),
            lease_contentions: AtomicU64::new(0),
            auto_disables: AtomicU64::new(0),
            orphaned_leases_cleared: AtomicU64::new(0),
            poll_latency_ms_total: AtomicU64::new(0),
            poll_latency_ms_count: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            polls_started: self.polls_started.load(Ordering::Relaxed),
            polls_succeeded: self.polls_succeeded.load(Ordering::Relaxed),
            polls_failed: self.polls_failed.load(Ordering::Relaxed),
            readings_good: self.readings_good.load(Ordering::Relaxed),
            readings_bad: self.readings_bad.load(Ordering::Relaxed),
            readings_uncertain: self.readings_uncertain.load(Ordering::Relaxed),
            tasks_enqueued: self.tasks_enqueued.load(Ordering::Relaxed),
            tasks_retried: self.tasks_retried.load(Ordering::Relaxed),
            tasks_exhausted: self.tasks_exhausted.load(Ordering::Relaxed),
            tasks_superseded: self.tasks_superseded.load(Ordering::Relaxed),
            lease_contentions: self.lease_contentions.load(Ordering::Relaxed),
            auto_disables: self.auto_disables.load(Ordering::Relaxed),
            orphaned_leases_cleared: self.orphaned_leases_cleared.load(Ordering::Relaxed),
            poll_latency_ms_total: self.poll_latency_ms_total.load(Ordering::Relaxed),
            poll_latency_ms_count: self.poll_latency_ms_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for PollingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<PollingMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static PollingMetrics {
    METRICS.get_or_init(PollingMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 记录轮询周期开始次数。
pub fn record_poll_started() {
    metrics().polls_started.fetch_add(1, Ordering::Relaxed);
}

/// 记录轮询周期结果与耗时（毫秒）。
pub fn record_poll_finished(success: bool, latency_ms: u64) {
    let metrics = metrics();
    if success {
        metrics.polls_succeeded.fetch_add(1, Ordering::Relaxed);
    } else {
        metrics.polls_failed.fetch_add(1, Ordering::Relaxed);
    }
    metrics
        .poll_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .poll_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录一个 good 读数。
pub fn record_reading_good() {
    metrics().readings_good.fetch_add(1, Ordering::Relaxed);
}

/// 记录一个 bad 读数。
pub fn record_reading_bad() {
    metrics().readings_bad.fetch_add(1, Ordering::Relaxed);
}

/// 记录一个 uncertain 读数（浮点 NaN/Inf）。
pub fn record_reading_uncertain() {
    metrics().readings_uncertain.fetch_add(1, Ordering::Relaxed);
}

/// 记录任务入队次数。
pub fn record_task_enqueued() {
    metrics().tasks_enqueued.fetch_add(1, Ordering::Relaxed);
}

/// 记录任务重试次数。
pub fn record_task_retried() {
    metrics().tasks_retried.fetch_add(1, Ordering::Relaxed);
}

/// 记录任务重试耗尽次数。
pub fn record_task_exhausted() {
    metrics().tasks_exhausted.fetch_add(1, Ordering::Relaxed);
}

/// 记录因租约 token 不匹配而丢弃的任务。
pub fn record_task_superseded() {
    metrics().tasks_superseded.fetch_add(1, Ordering::Relaxed);
}

/// 记录租约竞争失败（另一实例已调度）。
pub fn record_lease_contention() {
    metrics().lease_contentions.fetch_add(1, Ordering::Relaxed);
}

/// 记录健康策略自动停用次数。
pub fn record_auto_disable() {
    metrics().auto_disables.fetch_add(1, Ordering::Relaxed);
}

/// 记录孤儿租约清理数量。
pub fn record_orphaned_leases_cleared(count: u64) {
    metrics()
        .orphaned_leases_cleared
        .fetch_add(count, Ordering::Relaxed);
}
