//! 自调度轮询调度器
//!
//! 每个网关的状态机：
//!
//! ```text
//!          activate / interval_changed / sweep
//!   Idle ───────────────────────────────────────► Leased ──task start──► Running
//!    ▲                                              ▲                      │
//!    │            停用 / 删除 / 健康策略停用            │  仍启用：延迟 poll_interval │
//!    └──────────────────────────────────────────────┴──────────────────────┘
//! ```
//!
//! 并发约束：同一网关任意时刻最多一个排队中或执行中的任务，由调度租约保证。
//! 租约带 token，任务启动时 token 不再是当前租约的视为已被取代，直接丢弃。

use crate::error::PollingError;
use crate::executor::PollExecutor;
use crate::health::GatewayHealthPolicy;
use crate::notify::StatusNotifier;
use crate::queue::{PollTask, QueueStatsSnapshot, TaskHandler, TaskQueue};
use async_trait::async_trait;
use domain::{Gateway, GatewayStatus, GatewayStatusEvent, StatusChangeSource, now_epoch_ms};
use ems_storage::{LeaseStore, PollingRepository};
use ems_telemetry::{record_auto_disable, record_lease_contention, record_task_enqueued, record_task_superseded};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 租约 TTL 在任务最长耗时之外的宽限
const LEASE_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched { task_id: String, lease_token: String },
    /// 已有租约，未入队
    AlreadyScheduled,
}

impl DispatchOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, Self::Dispatched { .. })
    }
}

/// 启用结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    /// 启用前是否处于停用状态
    pub changed: bool,
    pub dispatch: DispatchOutcome,
}

impl Activation {
    pub fn is_dispatched(&self) -> bool {
        self.dispatch.is_dispatched()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayScheduleState {
    Idle,
    Leased,
    Running,
}

/// 单个网关的调度快照。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySchedule {
    pub gateway_id: String,
    pub name: String,
    pub is_active: bool,
    pub is_online: bool,
    pub state: GatewayScheduleState,
    pub poll_interval_seconds: u32,
    pub lease_expires_at_ms: Option<i64>,
    pub last_seen_at_ms: Option<i64>,
    pub success_count: u64,
    pub failure_count: u64,
}

/// 调度器整体快照。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub generated_at_ms: i64,
    pub total_gateways: usize,
    pub active_gateways: usize,
    pub idle: usize,
    pub leased: usize,
    pub running: usize,
    pub queue: QueueStatsSnapshot,
    pub gateways: Vec<GatewaySchedule>,
}

pub struct PollScheduler {
    repository: Arc<dyn PollingRepository>,
    leases: Arc<dyn LeaseStore>,
    queue: Arc<dyn TaskQueue>,
    executor: PollExecutor,
    notifier: Arc<dyn StatusNotifier>,
    policy: GatewayHealthPolicy,
    running: Mutex<HashSet<String>>,
    /// 已完成轮询、尚未收尾的任务；队列重试时跳过执行器
    polled: Mutex<HashSet<String>>,
}

/// 执行期间把网关标记为 Running，离开作用域时清除
struct RunningGuard<'a> {
    running: &'a Mutex<HashSet<String>>,
    gateway_id: String,
}

impl<'a> RunningGuard<'a> {
    fn enter(running: &'a Mutex<HashSet<String>>, gateway_id: &str) -> Self {
        if let Ok(mut set) = running.lock() {
            set.insert(gateway_id.to_string());
        }
        Self {
            running,
            gateway_id: gateway_id.to_string(),
        }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.running.lock() {
            set.remove(&self.gateway_id);
        }
    }
}

impl PollScheduler {
    pub fn new(
        repository: Arc<dyn PollingRepository>,
        leases: Arc<dyn LeaseStore>,
        queue: Arc<dyn TaskQueue>,
        executor: PollExecutor,
        notifier: Arc<dyn StatusNotifier>,
    ) -> Self {
        Self {
            repository,
            leases,
            queue,
            executor,
            notifier,
            policy: GatewayHealthPolicy::default(),
            running: Mutex::new(HashSet::new()),
            polled: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_policy(mut self, policy: GatewayHealthPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// 租约需覆盖入队延迟与任务的全部重试，且不短于一个轮询间隔
    pub fn lease_ttl(&self, gateway: &Gateway, delay: Duration) -> Duration {
        let options = self.queue.options();
        let ttl = delay + options.worst_case_duration() + LEASE_GRACE;
        let interval = Duration::from_secs(u64::from(gateway.poll_interval_seconds.max(1)));
        ttl.max(interval)
    }

    /// 获取租约并入队一个轮询任务；已有租约时不入队。
    pub async fn dispatch(
        &self,
        gateway: &Gateway,
        delay: Duration,
    ) -> Result<DispatchOutcome, PollingError> {
        let token = uuid::Uuid::new_v4().to_string();
        let ttl = self.lease_ttl(gateway, delay);
        let acquired = self
            .leases
            .try_acquire(&gateway.gateway_id, &token, ttl)
            .await?;
        if !acquired {
            record_lease_contention();
            debug!(
                target: "ems.polling",
                gateway_id = %gateway.gateway_id,
                "dispatch_skipped_lease_held"
            );
            return Ok(DispatchOutcome::AlreadyScheduled);
        }

        self.enqueue_leased(gateway, token, delay).await
    }

    /// 入队持有 `token` 租约的任务；入队失败时释放该租约。
    async fn enqueue_leased(
        &self,
        gateway: &Gateway,
        token: String,
        delay: Duration,
    ) -> Result<DispatchOutcome, PollingError> {
        let task = PollTask::new(gateway.gateway_id.clone(), token.clone());
        let task_id = task.task_id.clone();
        if let Err(err) = self.queue.enqueue(task, delay).await {
            if let Err(release_err) = self.leases.release(&gateway.gateway_id, &token).await {
                warn!(
                    target: "ems.polling",
                    gateway_id = %gateway.gateway_id,
                    error = %release_err,
                    "lease_release_failed"
                );
            }
            return Err(PollingError::Queue(err.to_string()));
        }
        record_task_enqueued();
        info!(
            target: "ems.polling",
            gateway_id = %gateway.gateway_id,
            task_id = %task_id,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "poll_task_enqueued"
        );
        Ok(DispatchOutcome::Dispatched {
            task_id,
            lease_token: token,
        })
    }

    /// 运维启用网关；已启用时仅在没有租约时补调度。
    pub async fn activate(&self, gateway_id: &str) -> Result<Activation, PollingError> {
        let previous = self
            .repository
            .set_gateway_active(gateway_id, true)
            .await?
            .ok_or_else(|| PollingError::GatewayNotFound(gateway_id.to_string()))?;
        if !previous {
            self.emit(gateway_id, true, StatusChangeSource::Operator);
        }
        let gateway = self
            .repository
            .get_gateway(gateway_id)
            .await?
            .ok_or_else(|| PollingError::GatewayNotFound(gateway_id.to_string()))?;
        let dispatch = self.dispatch(&gateway, Duration::ZERO).await?;
        Ok(Activation {
            changed: !previous,
            dispatch,
        })
    }

    /// 运维停用网关，返回状态是否发生变化。
    ///
    /// 不清除租约：排队中的任务启动时会发现网关已停用并结束调度链。
    pub async fn deactivate(&self, gateway_id: &str) -> Result<bool, PollingError> {
        let previous = self
            .repository
            .set_gateway_active(gateway_id, false)
            .await?
            .ok_or_else(|| PollingError::GatewayNotFound(gateway_id.to_string()))?;
        if previous {
            self.emit(gateway_id, false, StatusChangeSource::Operator);
        }
        Ok(previous)
    }

    /// 网关新建或轮询间隔变更：启用状态下若无租约则立即调度。
    pub async fn interval_changed(
        &self,
        gateway_id: &str,
    ) -> Result<Option<DispatchOutcome>, PollingError> {
        let gateway = self
            .repository
            .get_gateway(gateway_id)
            .await?
            .ok_or_else(|| PollingError::GatewayNotFound(gateway_id.to_string()))?;
        if !gateway.is_active {
            return Ok(None);
        }
        self.dispatch(&gateway, Duration::ZERO).await.map(Some)
    }

    /// 删除网关及其点位、读数，并清除租约。
    pub async fn gateway_deleted(&self, gateway_id: &str) -> Result<bool, PollingError> {
        let deleted = self.repository.delete_gateway(gateway_id).await?;
        self.leases.force_release(gateway_id).await?;
        info!(target: "ems.polling", gateway_id = %gateway_id, deleted, "gateway_deleted");
        Ok(deleted)
    }

    /// 调度快照。Running 只反映本进程内正在执行的任务。
    pub async fn status(&self) -> Result<SchedulerStatus, PollingError> {
        let now_ms = now_epoch_ms();
        let gateways = self.repository.list_gateways().await?;
        let leases: HashMap<String, i64> = self
            .leases
            .list()
            .await?
            .into_iter()
            .map(|lease| (lease.gateway_id, lease.expires_at_ms))
            .collect();
        let running: HashSet<String> = self
            .running
            .lock()
            .map(|set| set.clone())
            .unwrap_or_default();

        let mut items = Vec::with_capacity(gateways.len());
        for gateway in gateways {
            let lease_expires_at_ms = leases.get(&gateway.gateway_id).copied();
            let state = if running.contains(&gateway.gateway_id) {
                GatewayScheduleState::Running
            } else if lease_expires_at_ms.is_some() {
                GatewayScheduleState::Leased
            } else {
                GatewayScheduleState::Idle
            };
            items.push(GatewaySchedule {
                is_online: gateway.is_online(now_ms),
                gateway_id: gateway.gateway_id,
                name: gateway.name,
                is_active: gateway.is_active,
                state,
                poll_interval_seconds: gateway.poll_interval_seconds,
                lease_expires_at_ms,
                last_seen_at_ms: gateway.last_seen_at_ms,
                success_count: gateway.success_count,
                failure_count: gateway.failure_count,
            });
        }

        let count = |state: GatewayScheduleState| items.iter().filter(|g| g.state == state).count();
        Ok(SchedulerStatus {
            generated_at_ms: now_ms,
            total_gateways: items.len(),
            active_gateways: items.iter().filter(|g| g.is_active).count(),
            idle: count(GatewayScheduleState::Idle),
            leased: count(GatewayScheduleState::Leased),
            running: count(GatewayScheduleState::Running),
            queue: self.queue.stats(),
            gateways: items,
        })
    }

    fn emit(&self, gateway_id: &str, is_active: bool, source: StatusChangeSource) {
        self.notifier.notify(GatewayStatusEvent {
            gateway_id: gateway_id.to_string(),
            previous_status: GatewayStatus::from_active(!is_active),
            current_status: GatewayStatus::from_active(is_active),
            source,
            ts_ms: now_epoch_ms(),
        });
    }

    async fn release_own(&self, task: &PollTask) {
        if let Err(err) = self
            .leases
            .release(&task.gateway_id, &task.lease_token)
            .await
        {
            warn!(
                target: "ems.polling",
                gateway_id = %task.gateway_id,
                task_id = %task.task_id,
                error = %err,
                "lease_release_failed"
            );
        }
    }

    /// 健康策略判定；触发时停用网关并通知，返回是否停用。
    async fn apply_health_policy(&self, gateway: &Gateway) -> Result<bool, PollingError> {
        if !gateway.is_active || !self.policy.should_disable(gateway) {
            return Ok(false);
        }
        let previous = self
            .repository
            .set_gateway_active(&gateway.gateway_id, false)
            .await?;
        if previous == Some(true) {
            record_auto_disable();
            self.emit(&gateway.gateway_id, false, StatusChangeSource::HealthPolicy);
            warn!(
                target: "ems.polling",
                gateway_id = %gateway.gateway_id,
                success_count = gateway.success_count,
                failure_count = gateway.failure_count,
                failure_rate = gateway.failure_rate(),
                "gateway_auto_disabled"
            );
        }
        Ok(true)
    }

    /// 把本任务租约原子换成下一周期的 token，再以 poll_interval 延迟入队。
    ///
    /// 续租期间租约始终存在，sweep 或 activate 无法插入立即执行的任务。
    /// 本任务租约已过期时退回普通调度。
    async fn reschedule(&self, gateway: &Gateway, task: &PollTask) {
        let delay = Duration::from_secs(u64::from(gateway.poll_interval_seconds.max(1)));
        let next_token = uuid::Uuid::new_v4().to_string();
        let ttl = self.lease_ttl(gateway, delay);
        let result = match self
            .leases
            .renew(&gateway.gateway_id, &task.lease_token, &next_token, ttl)
            .await
        {
            Ok(true) => self.enqueue_leased(gateway, next_token, delay).await,
            Ok(false) => self.dispatch(gateway, delay).await,
            Err(err) => Err(err.into()),
        };
        match result {
            Ok(DispatchOutcome::Dispatched { .. }) => {}
            Ok(DispatchOutcome::AlreadyScheduled) => {
                debug!(
                    target: "ems.polling",
                    gateway_id = %gateway.gateway_id,
                    "reschedule_skipped_lease_held"
                );
            }
            // 调度链在此中断，由审计 sweep 恢复
            Err(err) => {
                self.release_own(task).await;
                error!(
                    target: "ems.polling",
                    gateway_id = %gateway.gateway_id,
                    error = %err,
                    "poll_reschedule_failed"
                );
            }
        }
    }

    /// 轮询完成后的收尾：健康策略、停用检查、调度下一周期。
    async fn finish_cycle(&self, task: &PollTask) -> Result<(), PollingError> {
        let Some(latest) = self.repository.get_gateway(&task.gateway_id).await? else {
            self.release_own(task).await;
            return Ok(());
        };
        if self.apply_health_policy(&latest).await? {
            self.release_own(task).await;
            return Ok(());
        }
        if !latest.is_active {
            self.release_own(task).await;
            info!(target: "ems.polling", gateway_id = %latest.gateway_id, "poll_chain_stopped_inactive");
            return Ok(());
        }
        self.reschedule(&latest, task).await;
        Ok(())
    }

    fn mark_polled(&self, task: &PollTask, polled: bool) {
        if let Ok(mut set) = self.polled.lock() {
            if polled {
                set.insert(task.task_id.clone());
            } else {
                set.remove(&task.task_id);
            }
        }
    }

    fn is_polled(&self, task: &PollTask) -> bool {
        self.polled
            .lock()
            .map(|set| set.contains(&task.task_id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl TaskHandler for PollScheduler {
    async fn handle(&self, task: &PollTask) -> Result<(), PollingError> {
        let current = self.leases.current(&task.gateway_id).await?;
        if current.as_ref().map(|lease| lease.token.as_str()) != Some(task.lease_token.as_str()) {
            self.mark_polled(task, false);
            record_task_superseded();
            debug!(
                target: "ems.polling",
                gateway_id = %task.gateway_id,
                task_id = %task.task_id,
                "poll_task_superseded"
            );
            return Ok(());
        }

        // 重试时本周期已写入读数和计数，不再轮询
        if !self.is_polled(task) {
            let Some(gateway) = self.repository.get_gateway(&task.gateway_id).await? else {
                self.release_own(task).await;
                return Ok(());
            };
            if !gateway.is_active {
                self.release_own(task).await;
                info!(target: "ems.polling", gateway_id = %gateway.gateway_id, "poll_chain_stopped_inactive");
                return Ok(());
            }

            let guard = RunningGuard::enter(&self.running, &gateway.gateway_id);
            let result = self.executor.poll_gateway(&gateway).await;
            drop(guard);
            match result {
                Ok(_) => self.mark_polled(task, true),
                Err(PollingError::GatewayInactive(_)) | Err(PollingError::GatewayNotFound(_)) => {
                    self.release_own(task).await;
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }

        // 收尾失败不交给队列重试：释放租约，由审计 sweep 恢复调度链
        if let Err(err) = self.finish_cycle(task).await {
            self.release_own(task).await;
            error!(
                target: "ems.polling",
                gateway_id = %task.gateway_id,
                task_id = %task.task_id,
                error = %err,
                "poll_cycle_finish_failed"
            );
        }
        self.mark_polled(task, false);
        Ok(())
    }

    async fn on_final_failure(&self, task: &PollTask, error: &PollingError) {
        if self.is_polled(task) {
            // 轮询本身已完成并计数，只是收尾超时
            self.mark_polled(task, false);
            self.release_own(task).await;
            warn!(
                target: "ems.polling",
                gateway_id = %task.gateway_id,
                task_id = %task.task_id,
                error = %error,
                "poll_cycle_finish_abandoned"
            );
            return;
        }
        if let Err(err) = self
            .repository
            .increment_gateway_failure(&task.gateway_id)
            .await
        {
            warn!(
                target: "ems.polling",
                gateway_id = %task.gateway_id,
                error = %err,
                "failure_count_update_failed"
            );
        }
        match self.repository.get_gateway(&task.gateway_id).await {
            Ok(Some(gateway)) => {
                if let Err(err) = self.apply_health_policy(&gateway).await {
                    warn!(
                        target: "ems.polling",
                        gateway_id = %task.gateway_id,
                        error = %err,
                        "health_policy_apply_failed"
                    );
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(
                    target: "ems.polling",
                    gateway_id = %task.gateway_id,
                    error = %err,
                    "gateway_reload_failed"
                );
            }
        }
        self.release_own(task).await;
        error!(
            target: "ems.polling",
            gateway_id = %task.gateway_id,
            task_id = %task.task_id,
            error = %error,
            "poll_task_failed_permanently"
        );
    }
}
