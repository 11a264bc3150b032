//! 调度一致性审计
//!
//! - `run_sweep`：为每个没有租约的启用网关补调度（恢复静默中断的调度链）
//! - `validate_integrity`：检查卡住（stuck）、孤儿租约（orphaned lease）、疑似停滞（stalled）
//! - `audit_and_cleanup`：清除孤儿租约，为卡住的网关重新调度

use crate::error::PollingError;
use crate::scheduler::{DispatchOutcome, PollScheduler};
use domain::{Gateway, now_epoch_ms};
use ems_storage::{LeaseStore, PollingRepository};
use ems_telemetry::record_orphaned_leases_cleared;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuditorConfig {
    /// 无租约且超过 N 个轮询间隔没有读数视为卡住
    pub stuck_intervals: u32,
    /// last_seen 超过 N 个轮询间隔视为疑似停滞
    pub stalled_intervals: u32,
    pub grace: Duration,
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self {
            stuck_intervals: 3,
            stalled_intervals: 5,
            grace: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub scheduled: usize,
    pub already_scheduled: usize,
    pub total: usize,
    /// 入队失败的网关数（已记录日志）
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityIssueKind {
    Stuck,
    OrphanedLease,
    Stalled,
}

impl IntegrityIssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrityIssueKind::Stuck => "stuck",
            IntegrityIssueKind::OrphanedLease => "orphaned_lease",
            IntegrityIssueKind::Stalled => "stalled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityIssue {
    pub kind: IntegrityIssueKind,
    pub gateway_id: String,
    pub detail: String,
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.detail)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub orphaned_leases_cleared: usize,
    pub stuck_rescheduled: usize,
    pub stalled_detected: usize,
    pub issues: Vec<IntegrityIssue>,
}

pub struct SchedulingAuditor {
    repository: Arc<dyn PollingRepository>,
    leases: Arc<dyn LeaseStore>,
    scheduler: Arc<PollScheduler>,
    config: AuditorConfig,
}

fn threshold_ms(gateway: &Gateway, intervals: u32, grace: Duration) -> i64 {
    let grace_ms = i64::try_from(grace.as_millis()).unwrap_or(i64::MAX);
    gateway
        .poll_interval_ms()
        .saturating_mul(i64::from(intervals))
        .saturating_add(grace_ms)
}

impl SchedulingAuditor {
    pub fn new(
        repository: Arc<dyn PollingRepository>,
        leases: Arc<dyn LeaseStore>,
        scheduler: Arc<PollScheduler>,
        config: AuditorConfig,
    ) -> Self {
        Self {
            repository,
            leases,
            scheduler,
            config,
        }
    }

    pub async fn run_sweep(&self) -> Result<SweepReport, PollingError> {
        let gateways = self.repository.get_active_gateways().await?;
        let mut report = SweepReport {
            total: gateways.len(),
            ..SweepReport::default()
        };
        for gateway in &gateways {
            match self.scheduler.dispatch(gateway, Duration::ZERO).await {
                Ok(DispatchOutcome::Dispatched { .. }) => report.scheduled += 1,
                Ok(DispatchOutcome::AlreadyScheduled) => report.already_scheduled += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        target: "ems.polling",
                        gateway_id = %gateway.gateway_id,
                        error = %err,
                        "sweep_dispatch_failed"
                    );
                }
            }
        }
        info!(
            target: "ems.polling",
            scheduled = report.scheduled,
            already_scheduled = report.already_scheduled,
            failed = report.failed,
            total = report.total,
            "scheduling_sweep_finished"
        );
        Ok(report)
    }

    pub async fn validate_integrity(&self) -> Result<Vec<IntegrityIssue>, PollingError> {
        let now_ms = now_epoch_ms();
        let gateways: HashMap<String, Gateway> = self
            .repository
            .list_gateways()
            .await?
            .into_iter()
            .map(|gateway| (gateway.gateway_id.clone(), gateway))
            .collect();
        let leases = self.leases.list().await?;
        let leased: HashMap<&str, i64> = leases
            .iter()
            .map(|lease| (lease.gateway_id.as_str(), lease.expires_at_ms))
            .collect();

        let mut issues = Vec::new();
        let mut active: Vec<&Gateway> = gateways.values().filter(|g| g.is_active).collect();
        active.sort_by(|a, b| a.gateway_id.cmp(&b.gateway_id));

        for gateway in active {
            if !leased.contains_key(gateway.gateway_id.as_str()) {
                let threshold = threshold_ms(gateway, self.config.stuck_intervals, self.config.grace);
                let last_reading = self
                    .repository
                    .last_reading_at_ms(&gateway.gateway_id)
                    .await?;
                let stuck = match last_reading {
                    Some(ts_ms) => now_ms - ts_ms > threshold,
                    None => true,
                };
                if stuck {
                    issues.push(IntegrityIssue {
                        kind: IntegrityIssueKind::Stuck,
                        gateway_id: gateway.gateway_id.clone(),
                        detail: match last_reading {
                            Some(ts_ms) => format!(
                                "gateway {} is active with no scheduled task; last reading {}s ago",
                                gateway.gateway_id,
                                (now_ms - ts_ms) / 1000
                            ),
                            None => format!(
                                "gateway {} is active with no scheduled task and no readings",
                                gateway.gateway_id
                            ),
                        },
                    });
                }
            }

            if let Some(last_seen) = gateway.last_seen_at_ms {
                let threshold =
                    threshold_ms(gateway, self.config.stalled_intervals, self.config.grace);
                if now_ms - last_seen > threshold {
                    issues.push(IntegrityIssue {
                        kind: IntegrityIssueKind::Stalled,
                        gateway_id: gateway.gateway_id.clone(),
                        detail: format!(
                            "gateway {} last seen {}s ago (poll interval {}s)",
                            gateway.gateway_id,
                            (now_ms - last_seen) / 1000,
                            gateway.poll_interval_seconds
                        ),
                    });
                }
            }
        }

        for lease in &leases {
            let orphaned = match gateways.get(&lease.gateway_id) {
                Some(gateway) => !gateway.is_active,
                None => true,
            };
            if orphaned {
                issues.push(IntegrityIssue {
                    kind: IntegrityIssueKind::OrphanedLease,
                    gateway_id: lease.gateway_id.clone(),
                    detail: format!(
                        "lease for gateway {} has no active gateway",
                        lease.gateway_id
                    ),
                });
            }
        }
        Ok(issues)
    }

    pub async fn audit_and_cleanup(&self) -> Result<CleanupReport, PollingError> {
        let issues = self.validate_integrity().await?;
        let mut report = CleanupReport::default();
        for issue in &issues {
            match issue.kind {
                IntegrityIssueKind::OrphanedLease => {
                    if self.leases.force_release(&issue.gateway_id).await? {
                        report.orphaned_leases_cleared += 1;
                    }
                }
                IntegrityIssueKind::Stuck => {
                    let Some(gateway) = self.repository.get_gateway(&issue.gateway_id).await?
                    else {
                        continue;
                    };
                    if !gateway.is_active {
                        continue;
                    }
                    match self.scheduler.dispatch(&gateway, Duration::ZERO).await {
                        Ok(outcome) if outcome.is_dispatched() => report.stuck_rescheduled += 1,
                        Ok(_) => {}
                        Err(err) => {
                            warn!(
                                target: "ems.polling",
                                gateway_id = %gateway.gateway_id,
                                error = %err,
                                "stuck_reschedule_failed"
                            );
                        }
                    }
                }
                IntegrityIssueKind::Stalled => {
                    report.stalled_detected += 1;
                    warn!(
                        target: "ems.polling",
                        gateway_id = %issue.gateway_id,
                        detail = %issue.detail,
                        "gateway_stalled"
                    );
                }
            }
        }
        record_orphaned_leases_cleared(report.orphaned_leases_cleared as u64);
        info!(
            target: "ems.polling",
            issues = issues.len(),
            orphaned_leases_cleared = report.orphaned_leases_cleared,
            stuck_rescheduled = report.stuck_rescheduled,
            stalled_detected = report.stalled_detected,
            "scheduling_audit_finished"
        );
        report.issues = issues;
        Ok(report)
    }
}
