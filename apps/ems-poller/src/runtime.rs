//! 服务装配与后台循环。

use crate::AppState;
use ems_config::AppConfig;
use ems_polling::{
    AuditorConfig, BroadcastNotifier, PollExecutor, PollScheduler, QueueWorker, SchedulingAuditor,
    TaskOptions, TokioTaskQueue,
};
use ems_protocol::{ModbusClientConfig, ModbusGatewayClient, RegisterReader};
use ems_storage::{
    InMemoryLeaseStore, InMemoryPollingRepository, LeaseStore, PgPollingRepository,
    PollingRepository, RedisLeaseStore, StorageError,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const STATUS_EVENT_CAPACITY: usize = 256;

/// 装配完成、待启动的服务组件。
pub struct Services {
    pub state: AppState,
    pub notifier: Arc<BroadcastNotifier>,
    pub worker: QueueWorker,
}

pub async fn build(config: &AppConfig) -> Result<Services, StorageError> {
    let repository = build_repository(config).await?;
    let leases = build_lease_store(config)?;

    let reader: Arc<dyn RegisterReader> = Arc::new(ModbusGatewayClient::new(ModbusClientConfig {
        connect_timeout_ms: config.modbus_connect_timeout_ms,
        read_timeout_ms: config.modbus_read_timeout_ms,
        idle_ttl_ms: config.modbus_idle_ttl_ms,
    }));
    let (queue, worker) = TokioTaskQueue::new(
        TaskOptions {
            timeout: Duration::from_secs(config.poll_task_timeout_seconds),
            max_attempts: config.poll_task_max_attempts,
            backoff: Duration::from_secs(config.poll_task_backoff_seconds),
        },
        config.poll_workers,
    );
    let notifier = Arc::new(BroadcastNotifier::new(STATUS_EVENT_CAPACITY));

    let executor = PollExecutor::new(repository.clone(), reader.clone());
    let scheduler = Arc::new(PollScheduler::new(
        repository.clone(),
        leases.clone(),
        Arc::new(queue),
        executor,
        notifier.clone(),
    ));
    let auditor = Arc::new(SchedulingAuditor::new(
        repository.clone(),
        leases,
        scheduler.clone(),
        AuditorConfig {
            stuck_intervals: config.audit_stuck_intervals,
            stalled_intervals: config.audit_stalled_intervals,
            ..AuditorConfig::default()
        },
    ));

    Ok(Services {
        state: AppState {
            repository,
            scheduler,
            auditor,
            reader,
        },
        notifier,
        worker,
    })
}

async fn build_repository(config: &AppConfig) -> Result<Arc<dyn PollingRepository>, StorageError> {
    match &config.database_url {
        Some(url) => {
            let repository = PgPollingRepository::connect(url).await?;
            info!(backend = "postgres", "polling_repository_ready");
            Ok(Arc::new(repository))
        }
        None => {
            warn!(backend = "in_memory", "polling_repository_ready");
            Ok(Arc::new(InMemoryPollingRepository::new()))
        }
    }
}

fn build_lease_store(config: &AppConfig) -> Result<Arc<dyn LeaseStore>, StorageError> {
    match &config.redis_url {
        Some(url) => {
            let store = RedisLeaseStore::connect(url, &config.lease_key_prefix)?;
            info!(backend = "redis", prefix = %config.lease_key_prefix, "lease_store_ready");
            Ok(Arc::new(store))
        }
        None => {
            warn!(backend = "in_memory", "lease_store_ready");
            Ok(Arc::new(InMemoryLeaseStore::new()))
        }
    }
}

/// 启动时补调度一次，之后按间隔执行巡检清理 + 补调度。
pub fn spawn_auditor_loop(
    auditor: Arc<SchedulingAuditor>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match auditor.run_sweep().await {
            Ok(report) => info!(
                target: "ems.polling",
                scheduled = report.scheduled,
                already_scheduled = report.already_scheduled,
                total = report.total,
                "bootstrap_sweep_completed"
            ),
            Err(err) => error!(target: "ems.polling", error = %err, "bootstrap_sweep_failed"),
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // 第一次 tick 立即返回
        ticker.tick().await;
        loop {
            ticker.tick().await;
            run_audit_cycle(&auditor).await;
        }
    })
}

async fn run_audit_cycle(auditor: &SchedulingAuditor) {
    match auditor.audit_and_cleanup().await {
        Ok(report) if report.issues.is_empty() => {
            info!(target: "ems.polling", "scheduling_audit_clean");
        }
        Ok(report) => warn!(
            target: "ems.polling",
            issues = report.issues.len(),
            orphaned_leases_cleared = report.orphaned_leases_cleared,
            stuck_rescheduled = report.stuck_rescheduled,
            stalled_detected = report.stalled_detected,
            "scheduling_audit_found_issues"
        ),
        Err(err) => error!(target: "ems.polling", error = %err, "scheduling_audit_failed"),
    }
    if let Err(err) = auditor.run_sweep().await {
        error!(target: "ems.polling", error = %err, "scheduling_sweep_failed");
    }
}
