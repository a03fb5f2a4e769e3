//! End-to-end tests of the supervisor loop with a scripted device.

use std::time::Duration;

use sht4x_core::{MockDevice, SensorDevice, SensorReading};
use sht4x_service::{
    MemoryPublisher, PipelineOptions, RecoveryPolicy, ServiceError, Supervisor, SupervisorOptions,
};
use time::macros::datetime;
use tokio_util::sync::CancellationToken;

fn options(report_secs: u64, recovery: RecoveryPolicy) -> SupervisorOptions {
    SupervisorOptions {
        pipeline: PipelineOptions {
            topic: "test/conditions".to_string(),
            report_period: Duration::from_secs(report_secs),
            stats_period: Duration::from_secs(300),
        },
        tick_interval: Duration::from_secs(1),
        recovery,
    }
}

fn cancel_after(secs: u64) -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(secs)).await;
        child.cancel();
    });
    token
}

#[tokio::test(start_paused = true)]
async fn test_startup_open_failure_is_fatal() {
    let device = MockDevice::new("/dev/missing").with_open_failure();
    let publisher = MemoryPublisher::new();

    let result = Supervisor::start(
        device.clone(),
        publisher.clone(),
        options(10, RecoveryPolicy::default()),
    )
    .await;

    assert!(matches!(result, Err(ServiceError::DeviceOpen(_))));
    assert!(!device.is_open());
    assert!(publisher.is_disconnected());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_resources() {
    let device = MockDevice::new("/dev/mock");
    let publisher = MemoryPublisher::new();
    let supervisor = Supervisor::start(
        device.clone(),
        publisher.clone(),
        options(10, RecoveryPolicy::default()),
    )
    .await
    .unwrap();
    assert!(device.is_open());

    let token = CancellationToken::new();
    token.cancel();
    let stats = supervisor.run(token).await.unwrap();

    assert_eq!(stats.messages, 0);
    assert!(!device.is_open());
    assert_eq!(device.close_count(), 1);
    assert!(publisher.is_disconnected());
}

#[tokio::test(start_paused = true)]
async fn test_publishes_at_report_period() {
    let reading = SensorReading::new(42, 21.5, 55.256, datetime!(2024-05-01 12:30:00 UTC));
    let device = MockDevice::new("/dev/mock").with_reading(reading);
    let publisher = MemoryPublisher::new();
    let supervisor = Supervisor::start(
        device.clone(),
        publisher.clone(),
        options(10, RecoveryPolicy::default()),
    )
    .await
    .unwrap();

    // Ticks at 0..=35s: the gate fires at 11s, 22s and 33s
    let stats = supervisor.run(cancel_after(35)).await.unwrap();

    assert_eq!(publisher.len(), 3);
    assert_eq!(stats.messages, 3);
    assert_eq!(stats.errors, 0);
    for message in publisher.messages() {
        assert_eq!(message.topic, "test/conditions");
        let value: serde_json::Value = serde_json::from_str(&message.payload).unwrap();
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }
    assert!(publisher.is_disconnected());
}

#[tokio::test(start_paused = true)]
async fn test_read_failure_then_reopen_resumes() {
    let device = MockDevice::new("/dev/mock").with_read_failure();
    let publisher = MemoryPublisher::new();
    let supervisor = Supervisor::start(
        device.clone(),
        publisher.clone(),
        options(10, RecoveryPolicy::default()),
    )
    .await
    .unwrap();

    let stats = supervisor.run(cancel_after(40)).await.unwrap();

    assert_eq!(stats.errors, 1);
    assert_eq!(device.open_count(), 2);
    assert!(device.read_count() > 1);
    assert!(!publisher.is_empty());
    assert!(!device.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_read_failure_then_failed_reopen_is_fatal() {
    let device = MockDevice::new("/dev/mock").with_read_failure();
    let publisher = MemoryPublisher::new();
    let supervisor = Supervisor::start(
        device.clone(),
        publisher.clone(),
        options(10, RecoveryPolicy::default()),
    )
    .await
    .unwrap();
    device.push_open_failure();

    let result = supervisor.run(CancellationToken::new()).await;

    match result {
        Err(ServiceError::RecoveryFailed { attempts, .. }) => assert_eq!(attempts, 1),
        other => panic!("expected RecoveryFailed, got {:?}", other.map(|s| s.messages)),
    }
    assert_eq!(device.open_count(), 1);
    assert!(!device.is_open());
    assert!(publisher.is_disconnected());
}

#[tokio::test(start_paused = true)]
async fn test_recovery_retries_up_to_policy() {
    let device = MockDevice::new("/dev/mock").with_read_failure();
    let publisher = MemoryPublisher::new();
    let policy = RecoveryPolicy {
        attempts: 3,
        delay: Duration::from_secs(2),
    };
    let supervisor = Supervisor::start(device.clone(), publisher.clone(), options(10, policy))
        .await
        .unwrap();
    device.push_open_failure();
    device.push_open_failure();

    let stats = supervisor.run(cancel_after(20)).await.unwrap();

    assert_eq!(stats.errors, 1);
    assert_eq!(device.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_recovery_backoff() {
    let device = MockDevice::new("/dev/mock").with_read_failure();
    let publisher = MemoryPublisher::new();
    let supervisor = Supervisor::start(
        device.clone(),
        publisher.clone(),
        options(10, RecoveryPolicy::default()),
    )
    .await
    .unwrap();

    // Cancelled while waiting out the 5s reopen delay
    let stats = supervisor.run(cancel_after(2)).await.unwrap();

    assert_eq!(stats.errors, 1);
    assert_eq!(device.open_count(), 1);
    assert!(publisher.is_disconnected());
}
