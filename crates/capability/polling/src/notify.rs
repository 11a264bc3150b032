//! 网关状态变更通知
//!
//! 每次 `is_active` 翻转（运维操作或健康策略）都会发出一条 `GatewayStatusEvent`。

use domain::GatewayStatusEvent;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// 状态变更通知接口。
pub trait StatusNotifier: Send + Sync {
    fn notify(&self, event: GatewayStatusEvent);
}

/// 空通知器（用于占位）。
#[derive(Debug, Default)]
pub struct NoopNotifier;

impl StatusNotifier for NoopNotifier {
    fn notify(&self, _event: GatewayStatusEvent) {}
}

/// 进程内广播通知器。
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<GatewayStatusEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayStatusEvent> {
        self.sender.subscribe()
    }
}

impl StatusNotifier for BroadcastNotifier {
    fn notify(&self, event: GatewayStatusEvent) {
        // 没有订阅者时 send 返回 Err，事件直接丢弃
        if self.sender.send(event).is_err() {
            debug!(target: "ems.polling", "gateway_status_event_unobserved");
        }
    }
}

/// 订阅状态事件并写日志。
pub fn spawn_status_logger(
    mut receiver: broadcast::Receiver<GatewayStatusEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    info!(
                        target: "ems.polling",
                        gateway_id = %event.gateway_id,
                        previous_status = ?event.previous_status,
                        current_status = ?event.current_status,
                        source = ?event.source,
                        ts_ms = event.ts_ms,
                        "gateway_status_changed"
                    );
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target: "ems.polling", skipped, "gateway_status_events_lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{GatewayStatus, StatusChangeSource};

    #[tokio::test]
    async fn subscribers_receive_events() {
        let notifier = BroadcastNotifier::new(8);
        let mut receiver = notifier.subscribe();
        notifier.notify(GatewayStatusEvent {
            gateway_id: "gw-1".to_string(),
            previous_status: GatewayStatus::Active,
            current_status: GatewayStatus::Inactive,
            source: StatusChangeSource::HealthPolicy,
            ts_ms: 1,
        });
        let event = receiver.recv().await.unwrap();
        assert_eq!(event.gateway_id, "gw-1");
        assert_eq!(event.current_status, GatewayStatus::Inactive);
    }

    #[test]
    fn notify_without_subscribers_is_silent() {
        let notifier = BroadcastNotifier::new(8);
        notifier.notify(GatewayStatusEvent {
            gateway_id: "gw-1".to_string(),
            previous_status: GatewayStatus::Inactive,
            current_status: GatewayStatus::Active,
            source: StatusChangeSource::Operator,
            ts_ms: 1,
        });
    }
}
