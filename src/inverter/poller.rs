use crate::inverter::InverterClient;
use crate::prelude::*;

use std::time::Duration;
use tokio::time::MissedTickBehavior;

#[derive(Clone, Debug, PartialEq)]
pub enum ChannelData {
    /// Poll immediately instead of waiting for the next tick.
    PollNow,
    Shutdown,
}

/// Fetches the status document on a fixed interval and hands snapshots to the
/// coordinator. Keeps the last good snapshot around; a failed poll never
/// replaces it.
pub struct Poller {
    client: InverterClient,
    poll_config: bool,
    last: Option<StatusSnapshot>,
    unavailable_count: u64,
}

impl Poller {
    pub fn new(client: InverterClient, poll_config: bool) -> Self {
        Self {
            client,
            poll_config,
            last: None,
            unavailable_count: 0,
        }
    }

    /// One poll cycle. With `poll_config` set the settings document is fetched
    /// too and merged in; fields from `/status` win.
    pub async fn poll(&mut self) -> Result<StatusSnapshot, BridgeError> {
        match self.fetch().await {
            Ok(snapshot) => {
                self.last = Some(snapshot.clone());
                Ok(snapshot)
            }
            Err(err) => {
                self.unavailable_count += 1;
                Err(err)
            }
        }
    }

    async fn fetch(&self) -> Result<StatusSnapshot, BridgeError> {
        let status = self.client.status().await?;
        if !self.poll_config {
            return Ok(status);
        }

        let settings = self.client.config().await?;
        Ok(status.merge(settings))
    }

    /// Last good snapshot, possibly stale if later polls failed.
    pub fn latest(&self) -> Option<&StatusSnapshot> {
        self.last.as_ref()
    }

    pub fn unavailable_count(&self) -> u64 {
        self.unavailable_count
    }

    pub async fn start(&mut self, channels: Channels, interval: Duration) -> Result<()> {
        let mut receiver = channels.to_poller.subscribe();
        let mut ticker = tokio::time::interval(interval);
        // a slow inverter should push the schedule back, not cause a burst of catch-up polls
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("polling {} every {}s", self.client.base_url(), interval.as_secs());

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                msg = receiver.recv() => match msg {
                    Ok(ChannelData::PollNow) => {}
                    Ok(ChannelData::Shutdown) => break,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("poller lagged {} messages", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }

            let event = match self.poll().await {
                Ok(snapshot) => {
                    debug!("poll ok, {} fields", snapshot.len());
                    coordinator::ChannelData::Snapshot(snapshot)
                }
                Err(error) => {
                    warn!("poll failed ({} so far): {}", self.unavailable_count, error);
                    coordinator::ChannelData::PollFailed {
                        error,
                        unavailable_count: self.unavailable_count,
                    }
                }
            };

            if channels.to_coordinator.send(event).is_err() {
                bail!("send(to_coordinator) failed - channel closed?");
            }
        }

        info!("poller shutting down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn poller(url: &str, poll_config: bool) -> Poller {
        let config = Config::from_yaml(&format!("inverter:\n  url: {}\n  request_timeout: 2\n", url)).unwrap();
        Poller::new(InverterClient::new(&config.inverter).unwrap(), poll_config)
    }

    #[tokio::test]
    async fn merges_config_into_status() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/status")
            .with_body(r#"{"PV1Volt":300.1,"OutputConfig":"SBU"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/config")
            .with_body(r#"{"OutputConfig":"UTI","ChargeConfig":"PV Only","ACChargeAmps":20}"#)
            .create_async()
            .await;

        let mut p = poller(&server.url(), true);
        let snapshot = p.poll().await.unwrap();

        assert_eq!(snapshot.number("PV1Volt"), Some(300.1));
        assert_eq!(snapshot.text("OutputConfig").as_deref(), Some("SBU"));
        assert_eq!(snapshot.text("ChargeConfig").as_deref(), Some("PV Only"));
        assert_eq!(snapshot.number("ACChargeAmps"), Some(20.0));
        assert!(p.latest().is_some());
    }

    #[tokio::test]
    async fn config_poll_can_be_disabled() {
        let mut server = Server::new_async().await;
        server.mock("GET", "/status").with_body(r#"{"PV1Volt":1}"#).create_async().await;
        let config = server.mock("GET", "/config").expect(0).create_async().await;

        poller(&server.url(), false).poll().await.unwrap();
        config.assert_async().await;
    }

    #[tokio::test]
    async fn failure_keeps_last_snapshot() {
        let mut server = Server::new_async().await;
        let good = server
            .mock("GET", "/status")
            .with_body(r#"{"PV1Volt":42}"#)
            .create_async()
            .await;

        let mut p = poller(&server.url(), false);
        p.poll().await.unwrap();
        good.remove_async().await;

        server.mock("GET", "/status").with_body("not json").create_async().await;
        assert!(matches!(p.poll().await, Err(BridgeError::Parse(_))));
        assert!(matches!(p.poll().await, Err(BridgeError::Parse(_))));

        assert_eq!(p.unavailable_count(), 2);
        assert_eq!(p.latest().and_then(|s| s.number("PV1Volt")), Some(42.0));
    }

    #[tokio::test]
    async fn start_reports_to_coordinator_and_stops() {
        let mut server = Server::new_async().await;
        server.mock("GET", "/status").with_body(r#"{"PV1Volt":5}"#).create_async().await;

        let channels = Channels::new();
        let mut from_poller = channels.to_coordinator.subscribe();
        let mut p = poller(&server.url(), false);

        let c = channels.clone();
        let handle = tokio::spawn(async move { p.start(c, Duration::from_secs(3600)).await });

        // first tick of a tokio interval fires immediately
        match from_poller.recv().await.unwrap() {
            coordinator::ChannelData::Snapshot(s) => assert_eq!(s.number("PV1Volt"), Some(5.0)),
            other => panic!("unexpected {:?}", other),
        }

        channels.to_poller.send(ChannelData::Shutdown).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn failed_poll_does_not_end_the_loop() {
        let mut server = Server::new_async().await;
        let broken = server
            .mock("GET", "/status")
            .with_status(500)
            .create_async()
            .await;

        let channels = Channels::new();
        let mut from_poller = channels.to_coordinator.subscribe();
        let mut p = poller(&server.url(), false);

        let c = channels.clone();
        let handle = tokio::spawn(async move { p.start(c, Duration::from_secs(3600)).await });

        match from_poller.recv().await.unwrap() {
            coordinator::ChannelData::PollFailed {
                error: BridgeError::Transport(_),
                unavailable_count,
            } => assert_eq!(unavailable_count, 1),
            other => panic!("unexpected {:?}", other),
        }

        broken.remove_async().await;
        server.mock("GET", "/status").with_body(r#"{"PV1Volt":7}"#).create_async().await;
        channels.to_poller.send(ChannelData::PollNow).unwrap();

        match from_poller.recv().await.unwrap() {
            coordinator::ChannelData::Snapshot(s) => assert_eq!(s.number("PV1Volt"), Some(7.0)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!handle.is_finished());

        channels.to_poller.send(ChannelData::Shutdown).unwrap();
        handle.await.unwrap().unwrap();
    }
}
