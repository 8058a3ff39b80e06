#![allow(dead_code)]

use growatt_bridge::coordinator::{self, Coordinator};
use growatt_bridge::inverter::{InverterClient, Poller};
use growatt_bridge::prelude::*;

use std::time::Duration;

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Factory();
impl Factory {
    pub fn config(url: &str) -> ConfigWrapper {
        let yaml = format!(
            "inverter:\n  url: {}\n  username: admin\n  password: secret\n  request_timeout: 2\n  poll_config: false\n",
            url
        );
        ConfigWrapper::from_config(Config::from_yaml(&yaml).expect("test config"))
    }

    pub fn client(config: &ConfigWrapper) -> InverterClient {
        InverterClient::new(&config.inverter()).expect("test client")
    }

    pub fn coordinator(url: &str) -> Coordinator {
        let config = Self::config(url);
        let client = Self::client(&config);
        Coordinator::new(config, Channels::new(), client)
    }

    pub fn poller(url: &str) -> Poller {
        let config = Self::config(url);
        Poller::new(Self::client(&config), false)
    }

    pub fn snapshot(body: &str) -> StatusSnapshot {
        StatusSnapshot::from_json(body, chrono::Utc::now()).expect("test snapshot")
    }
}

/// Waits for the next event the coordinator's own tasks produced (eg a write
/// completing) and applies it.
pub async fn process_next(coordinator: &mut Coordinator) -> coordinator::ChannelData {
    let event = tokio::time::timeout(Duration::from_secs(5), coordinator.next_event())
        .await
        .expect("timed out waiting for coordinator event");
    coordinator.process(event.clone());
    event
}

pub fn user_sets(coordinator: &mut Coordinator, kind: ControlKind, value: &str) {
    coordinator.process(coordinator::ChannelData::Command(Command::SetControl(
        kind,
        value.to_string(),
    )));
}
