#![allow(dead_code)]

use async_trait::async_trait;
use domain::{ByteOrder, DataPoint, DataType, FunctionCode, Gateway, GatewayStatusEvent};
use ems_polling::{
    PollExecutor, PollScheduler, PollTask, QueueError, QueueStatsSnapshot, StatusNotifier,
    TaskOptions, TaskQueue,
};
use ems_protocol::{GatewayEndpoint, ProtocolError, ReadRequest, RegisterReader};
use ems_storage::{InMemoryLeaseStore, InMemoryPollingRepository};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};

pub fn gateway(id: &str, is_active: bool) -> Gateway {
    Gateway {
        gateway_id: id.to_string(),
        name: format!("gateway {}", id),
        host: "127.0.0.1".to_string(),
        port: 502,
        unit_id: 1,
        poll_interval_seconds: 30,
        is_active,
        last_seen_at_ms: None,
        success_count: 0,
        failure_count: 0,
    }
}

pub fn uint16_point(id: &str, gateway_id: &str, address: u16) -> DataPoint {
    DataPoint {
        point_id: id.to_string(),
        gateway_id: gateway_id.to_string(),
        function_code: FunctionCode::ReadHoldingRegisters,
        register_address: address,
        register_count: 1,
        data_type: DataType::Uint16,
        byte_order: ByteOrder::BigEndian,
        scale_factor: 1.0,
        enabled: true,
        label: id.to_string(),
        group: None,
    }
}

/// 按寄存器地址返回预设结果；未配置的地址返回连接错误。
#[derive(Default)]
pub struct ScriptedReader {
    responses: Mutex<HashMap<u16, Result<Vec<u16>, ProtocolError>>>,
    started: Option<mpsc::UnboundedSender<u16>>,
    gate: Option<Arc<Semaphore>>,
    calls: Mutex<Vec<u16>>,
}

impl ScriptedReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次读取前通知 `started` 并等待 `gate` 放行
    pub fn gated(started: mpsc::UnboundedSender<u16>, gate: Arc<Semaphore>) -> Self {
        Self {
            started: Some(started),
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn respond(&self, address: u16, result: Result<Vec<u16>, ProtocolError>) {
        self.responses.lock().unwrap().insert(address, result);
    }

    pub fn calls(&self) -> Vec<u16> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RegisterReader for ScriptedReader {
    async fn read_registers(
        &self,
        _endpoint: &GatewayEndpoint,
        request: &ReadRequest,
    ) -> Result<Vec<u16>, ProtocolError> {
        self.calls.lock().unwrap().push(request.start_address);
        if let Some(started) = &self.started {
            let _ = started.send(request.start_address);
        }
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.responses
            .lock()
            .unwrap()
            .get(&request.start_address)
            .cloned()
            .unwrap_or_else(|| Err(ProtocolError::Connection("connection refused".to_string())))
    }
}

/// 只记录入队请求的队列，由测试手动驱动任务。
#[derive(Default)]
pub struct RecordingQueue {
    tasks: Mutex<Vec<(PollTask, Duration)>>,
}

impl RecordingQueue {
    pub fn tasks(&self) -> Vec<(PollTask, Duration)> {
        self.tasks.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn enqueue(&self, task: PollTask, delay: Duration) -> Result<(), QueueError> {
        self.tasks.lock().unwrap().push((task, delay));
        Ok(())
    }

    fn options(&self) -> TaskOptions {
        TaskOptions::default()
    }

    fn stats(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            pending: self.len() as u64,
            ..QueueStatsSnapshot::default()
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<GatewayStatusEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<GatewayStatusEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl StatusNotifier for RecordingNotifier {
    fn notify(&self, event: GatewayStatusEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct Harness {
    pub repository: Arc<InMemoryPollingRepository>,
    pub leases: Arc<InMemoryLeaseStore>,
    pub queue: Arc<RecordingQueue>,
    pub notifier: Arc<RecordingNotifier>,
    pub reader: Arc<ScriptedReader>,
    pub scheduler: Arc<PollScheduler>,
}

impl Harness {
    pub fn new(reader: ScriptedReader) -> Self {
        let repository = Arc::new(InMemoryPollingRepository::new());
        let leases = Arc::new(InMemoryLeaseStore::new());
        let queue = Arc::new(RecordingQueue::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let reader = Arc::new(reader);
        let executor = PollExecutor::new(repository.clone(), reader.clone());
        let scheduler = Arc::new(PollScheduler::new(
            repository.clone(),
            leases.clone(),
            queue.clone(),
            executor,
            notifier.clone(),
        ));
        Self {
            repository,
            leases,
            queue,
            notifier,
            reader,
            scheduler,
        }
    }
}
