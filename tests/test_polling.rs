mod common;
use common::*;

use growatt_bridge::coordinator::ChannelData;
use growatt_bridge::prelude::*;
use mockito::Server;

#[tokio::test]
async fn malformed_poll_keeps_previous_metrics() {
    common_setup();

    let mut server = Server::new_async().await;
    let good = server
        .mock("GET", "/status")
        .with_status(200)
        .with_body(r#"{"SystemStatus":"Normal","PV1Volt":312.4,"BatterySOC":76}"#)
        .create_async()
        .await;

    let mut poller = Factory::poller(&server.url());
    let mut coordinator = Factory::coordinator(&server.url());

    let snapshot = poller.poll().await.unwrap();
    coordinator.process(ChannelData::Snapshot(snapshot));
    good.remove_async().await;

    server
        .mock("GET", "/status")
        .with_status(200)
        .with_body(r#"{"PV1Volt": 1, "#)
        .create_async()
        .await;

    let error = poller.poll().await.unwrap_err();
    assert!(matches!(error, BridgeError::Parse(_)));
    assert_eq!(poller.unavailable_count(), 1);

    coordinator.process(ChannelData::PollFailed {
        error,
        unavailable_count: poller.unavailable_count(),
    });

    assert_eq!(coordinator.store().number("growatt_pv1_voltage"), Some(312.4));
    assert_eq!(coordinator.store().number("growatt_battery_soc"), Some(76.0));
    assert_eq!(coordinator.stats.lock().unwrap().unavailable_count, 1);
    assert_eq!(poller.latest().and_then(|s| s.number("PV1Volt")), Some(312.4));
}

#[tokio::test]
async fn sentinel_field_keeps_previous_value() {
    common_setup();

    let mut coordinator = Factory::coordinator("http://127.0.0.1:9");

    coordinator.process(ChannelData::Snapshot(Factory::snapshot(
        r#"{"BatteryVolt":52.1,"InvTempC":38}"#,
    )));
    coordinator.process(ChannelData::Snapshot(Factory::snapshot(
        r#"{"BatteryVolt":"unavailable","InvTempC":39}"#,
    )));

    assert_eq!(coordinator.store().number("growatt_battery_voltage"), Some(52.1));
    assert_eq!(coordinator.store().number("growatt_inverter_temperature"), Some(39.0));
}

#[tokio::test]
async fn unreachable_inverter_counts_as_unavailable() {
    common_setup();

    let mut poller = Factory::poller("http://127.0.0.1:9");
    for _ in 0..2 {
        assert!(matches!(poller.poll().await, Err(BridgeError::Transport(_))));
    }
    assert_eq!(poller.unavailable_count(), 2);
    assert!(poller.latest().is_none());
}

#[tokio::test]
async fn auth_failure_is_reported() {
    common_setup();

    let mut server = Server::new_async().await;
    server.mock("GET", "/status").with_status(403).create_async().await;

    let mut poller = Factory::poller(&server.url());
    assert_eq!(poller.poll().await, Err(BridgeError::Auth(403)));
}
