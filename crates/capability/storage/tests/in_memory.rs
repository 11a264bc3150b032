use domain::{ByteOrder, DataPoint, DataType, FunctionCode, Gateway, Quality, Reading};
use ems_storage::{
    DispatchLease, InMemoryLeaseStore, InMemoryPollingRepository, LeaseStore, PollingRepository,
};
use std::time::Duration;

fn gateway(id: &str, is_active: bool) -> Gateway {
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

fn point(id: &str, gateway_id: &str, enabled: bool) -> DataPoint {
    DataPoint {
        point_id: id.to_string(),
        gateway_id: gateway_id.to_string(),
        function_code: FunctionCode::ReadHoldingRegisters,
        register_address: 100,
        register_count: 2,
        data_type: DataType::Float32,
        byte_order: ByteOrder::BigEndian,
        scale_factor: 1.0,
        enabled,
        label: id.to_string(),
        group: None,
    }
}

#[tokio::test]
async fn active_gateways_and_enabled_points_are_filtered() {
    let repository = InMemoryPollingRepository::new();
    repository.insert_gateway(gateway("gw-1", true)).expect("gw-1");
    repository.insert_gateway(gateway("gw-2", false)).expect("gw-2");
    repository.insert_data_point(point("p-2", "gw-1", true)).expect("p-2");
    repository.insert_data_point(point("p-1", "gw-1", true)).expect("p-1");
    repository.insert_data_point(point("p-3", "gw-1", false)).expect("p-3");

    let active = repository.get_active_gateways().await.expect("active");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].gateway_id, "gw-1");

    let points = repository.get_enabled_data_points("gw-1").await.expect("points");
    let ids: Vec<&str> = points.iter().map(|p| p.point_id.as_str()).collect();
    assert_eq!(ids, vec!["p-1", "p-2"]);
}

#[tokio::test]
async fn invalid_data_point_is_rejected() {
    let repository = InMemoryPollingRepository::new();
    repository.insert_gateway(gateway("gw-1", true)).expect("gw-1");
    let mut bad = point("p-1", "gw-1", true);
    bad.register_address = 65535;
    assert!(repository.insert_data_point(bad).is_err());
    assert!(repository.insert_data_point(point("p-2", "gw-missing", true)).is_err());
}

#[tokio::test]
async fn counters_and_active_flag_update() {
    let repository = InMemoryPollingRepository::new();
    repository.insert_gateway(gateway("gw-1", true)).expect("gw-1");
    repository.increment_gateway_success("gw-1").await.expect("success");
    repository.increment_gateway_failure("gw-1").await.expect("failure");
    repository.increment_gateway_failure("gw-1").await.expect("failure");

    let previous = repository.set_gateway_active("gw-1", false).await.expect("set");
    assert_eq!(previous, Some(true));
    let previous = repository.set_gateway_active("gw-1", false).await.expect("set");
    assert_eq!(previous, Some(false));
    let missing = repository.set_gateway_active("gw-x", true).await.expect("set");
    assert_eq!(missing, None);

    let stored = repository.get_gateway("gw-1").await.expect("get").expect("gw-1");
    assert_eq!(stored.success_count, 1);
    assert_eq!(stored.failure_count, 2);
    assert!(!stored.is_active);
}

#[tokio::test]
async fn delete_gateway_cascades() {
    let repository = InMemoryPollingRepository::new();
    repository.insert_gateway(gateway("gw-1", true)).expect("gw-1");
    repository.insert_data_point(point("p-1", "gw-1", true)).expect("p-1");
    repository
        .insert_reading(&Reading::without_value(
            "r-1".to_string(),
            "p-1",
            "gw-1",
            None,
            Quality::Bad,
            1_000,
        ))
        .await
        .expect("reading");
    assert_eq!(
        repository.last_reading_at_ms("gw-1").await.expect("last"),
        Some(1_000)
    );

    assert!(repository.delete_gateway("gw-1").await.expect("delete"));
    assert!(repository.get_gateway("gw-1").await.expect("get").is_none());
    assert!(repository.get_enabled_data_points("gw-1").await.expect("points").is_empty());
    assert!(repository.readings().is_empty());
    assert!(!repository.delete_gateway("gw-1").await.expect("delete again"));
}

#[tokio::test]
async fn lease_acquire_is_exclusive_until_released() {
    let leases = InMemoryLeaseStore::new();
    let ttl = Duration::from_secs(60);
    assert!(leases.try_acquire("gw-1", "t-1", ttl).await.expect("acquire"));
    assert!(!leases.try_acquire("gw-1", "t-2", ttl).await.expect("contend"));

    assert!(!leases.release("gw-1", "t-2").await.expect("wrong token"));
    assert_eq!(
        leases.current("gw-1").await.expect("current").map(|l| l.token),
        Some("t-1".to_string())
    );

    assert!(leases.release("gw-1", "t-1").await.expect("release"));
    assert!(leases.try_acquire("gw-1", "t-2", ttl).await.expect("reacquire"));
}

#[tokio::test]
async fn expired_lease_can_be_taken_over() {
    let leases = InMemoryLeaseStore::new();
    leases
        .insert(DispatchLease {
            gateway_id: "gw-1".to_string(),
            token: "stale".to_string(),
            acquired_at_ms: 0,
            expires_at_ms: 1,
        })
        .expect("insert");
    assert!(leases.current("gw-1").await.expect("current").is_none());
    assert!(leases.list().await.expect("list").is_empty());
    assert!(
        leases
            .try_acquire("gw-1", "fresh", Duration::from_secs(60))
            .await
            .expect("acquire")
    );
}

#[tokio::test]
async fn concurrent_acquire_has_single_winner() {
    let leases = std::sync::Arc::new(InMemoryLeaseStore::new());
    let mut handles = Vec::new();
    for i in 0..16 {
        let leases = leases.clone();
        handles.push(tokio::spawn(async move {
            leases
                .try_acquire("gw-1", &format!("t-{}", i), Duration::from_secs(60))
                .await
                .expect("acquire")
        }));
    }
    let mut winners = 0;
    for handle in handles {
        if handle.await.expect("join") {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn renew_swaps_token_without_gap() {
    let leases = InMemoryLeaseStore::new();
    let ttl = Duration::from_secs(60);
    assert!(leases.try_acquire("gw-1", "t-1", ttl).await.expect("acquire"));

    assert!(!leases.renew("gw-1", "other", "t-x", ttl).await.expect("wrong token"));
    assert!(leases.renew("gw-1", "t-1", "t-2", ttl).await.expect("renew"));
    assert_eq!(
        leases.current("gw-1").await.expect("current").map(|l| l.token),
        Some("t-2".to_string())
    );
    // 续租期间租约一直存在，其他调度方无法插入
    assert!(!leases.try_acquire("gw-1", "t-3", ttl).await.expect("contend"));
    assert!(!leases.release("gw-1", "t-1").await.expect("old token"));
    assert!(!leases.renew("gw-9", "t-1", "t-2", ttl).await.expect("missing"));
}

#[tokio::test]
async fn expired_lease_cannot_be_renewed() {
    let leases = InMemoryLeaseStore::new();
    leases
        .insert(DispatchLease {
            gateway_id: "gw-1".to_string(),
            token: "stale".to_string(),
            acquired_at_ms: 0,
            expires_at_ms: 1,
        })
        .expect("insert");
    assert!(
        !leases
            .renew("gw-1", "stale", "fresh", Duration::from_secs(60))
            .await
            .expect("renew")
    );
}
