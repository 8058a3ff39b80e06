use crate::coordinator::Stats;
use crate::prelude::*;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Publish, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

const MAX_PUBLISH_ATTEMPTS: u32 = 3;

// Message {{{
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: String,
}

impl Message {
    /// Parses an incoming message (namespace already stripped) into a command.
    ///
    /// eg control/output_mode/set => SetControl(OutputMode, payload)
    ///    cmd/config/BuzzerEnable => WriteConfig("BuzzerEnable", payload)
    pub fn to_command(&self) -> Result<Command> {
        use Command::*;

        let parts: Vec<&str> = self.topic.split('/').collect();
        let payload = self.payload.trim().to_string();

        let r = match parts[..] {
            ["control", slug, "set"] => match ControlKind::from_slug(slug) {
                Some(kind) => SetControl(kind, payload),
                None => bail!("unknown control {} in {}", slug, self.topic),
            },
            ["cmd", "config", key] if !key.is_empty() => WriteConfig(key.to_string(), payload),
            [..] => bail!("unhandled: {:?}", self),
        };

        Ok(r)
    }
} // }}}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    Message(Message),
    Shutdown,
}

#[derive(Clone)]
pub struct Mqtt {
    config: ConfigWrapper,
    shutdown: Arc<AtomicBool>,
    channels: Channels,
    shared_stats: Arc<Mutex<Stats>>,
}

impl Mqtt {
    pub fn new(config: ConfigWrapper, channels: Channels, shared_stats: Arc<Mutex<Stats>>) -> Self {
        Self {
            config,
            channels,
            shutdown: Arc::new(AtomicBool::new(false)),
            shared_stats,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let c = &self.config;

        if !c.mqtt().enabled() {
            info!("mqtt disabled, skipping");
            return Ok(());
        }

        let mut options = MqttOptions::new("growatt-bridge", c.mqtt().host(), c.mqtt().port());

        let will = LastWill {
            topic: self.lwt_topic(),
            message: bytes::Bytes::from("offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        options.set_last_will(will);

        options.set_keep_alive(std::time::Duration::from_secs(60));
        if let (Some(u), Some(p)) = (c.mqtt().username(), c.mqtt().password()) {
            options.set_credentials(u, p);
        }

        info!("initializing mqtt at {}:{}", c.mqtt().host(), c.mqtt().port());

        let (client, eventloop) = AsyncClient::new(options, 10);

        // subscriptions and announcements happen on every ConnAck, see receiver()
        futures::try_join!(self.receiver(eventloop, client.clone()), self.sender(client))?;

        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping MQTT client...");
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.channels.to_mqtt.send(ChannelData::Shutdown);
        Ok(())
    }

    // runs after every (re)connect: the session is clean, so subscriptions are
    // gone and the broker may be holding our last will
    async fn setup(&self, client: AsyncClient) -> Result<()> {
        client
            .publish(self.lwt_topic(), QoS::AtLeastOnce, true, "online")
            .await?;

        for topic in self.subscriptions() {
            client.subscribe(topic, QoS::AtMostOnce).await?;
        }

        if self.config.homeassistant_enabled() {
            let ha = home_assistant::Config::new(&self.config.inverter(), &self.config.mqtt());
            for msg in ha.all()?.into_iter() {
                let _ = client
                    .publish(&msg.topic, QoS::AtLeastOnce, msg.retain, msg.payload)
                    .await;
            }
        }

        Ok(())
    }

    fn subscriptions(&self) -> Vec<String> {
        let mqtt = self.config.mqtt();
        let namespace = mqtt.namespace();
        vec![
            format!("{}/control/+/set", namespace),
            format!("{}/cmd/config/+", namespace),
        ]
    }

    // mqtt -> coordinator
    async fn receiver(&self, mut eventloop: EventLoop, client: AsyncClient) -> Result<()> {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("MQTT receiver shutting down");
                break;
            }

            if let Ok(event) =
                tokio::time::timeout(std::time::Duration::from_secs(1), eventloop.poll()).await
            {
                match event {
                    Ok(event) => self.handle_event(event, &client),
                    Err(e) => {
                        if !self.shutdown.load(Ordering::Relaxed) {
                            error!("{}", e);
                            info!("reconnecting in 5s");
                            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        }

        info!("MQTT receiver loop exiting");
        Ok(())
    }

    fn handle_event(&self, event: Event, client: &AsyncClient) {
        match event {
            Event::Incoming(Incoming::ConnAck(connack)) => {
                info!("mqtt connected ({:?})", connack.code);
                // spawned: setup() queues more requests than the client buffer
                // holds, and only this loop drains them
                let mqtt = self.clone();
                let client = client.clone();
                tokio::spawn(async move {
                    if let Err(e) = mqtt.setup(client).await {
                        error!("mqtt setup failed: {}", e);
                    }
                });
            }
            Event::Incoming(Incoming::Publish(publish)) => {
                if let Err(e) = self.handle_message(publish) {
                    warn!("{}", e);
                }
            }
            _ => {} // keepalives etc
        }
    }

    fn handle_message(&self, publish: Publish) -> Result<()> {
        let Some(topic) = strip_namespace(&publish.topic, self.config.mqtt().namespace()) else {
            debug!("ignoring message outside our namespace: {}", publish.topic);
            return Ok(());
        };

        let payload = match String::from_utf8(publish.payload.to_vec()) {
            Ok(payload) => payload,
            Err(_) => {
                warn!("ignoring non-UTF-8 payload on {}: {:?}", publish.topic, publish.payload);
                return Ok(());
            }
        };

        let message = Message {
            topic: topic.to_owned(),
            retain: publish.retain,
            payload,
        };

        // a retained /set would replay an old user command on every reconnect
        if message.retain {
            debug!("ignoring retained command {:?}", message);
            return Ok(());
        }

        debug!("RX: {:?}", message);
        if self
            .channels
            .from_mqtt
            .send(ChannelData::Message(message))
            .is_err()
        {
            bail!("send(from_mqtt) failed - channel closed?");
        }

        Ok(())
    }

    // coordinator -> mqtt
    async fn sender(&self, client: AsyncClient) -> Result<()> {
        use ChannelData::*;

        let mut receiver = self.channels.to_mqtt.subscribe();

        loop {
            let data = match receiver.recv().await {
                Ok(data) => data,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("MQTT sender lagged, dropped {} messages", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match data {
                Shutdown => {
                    info!("MQTT sender received shutdown signal");
                    let _ = client.disconnect().await;
                    break;
                }
                Message(message) => {
                    let topic = format!("{}/{}", self.config.mqtt().namespace(), message.topic);
                    debug!("publishing: {} = {}", topic, message.payload);
                    let payload = message.payload.as_bytes().to_vec();

                    for attempt in 1..=MAX_PUBLISH_ATTEMPTS {
                        match client
                            .publish(&topic, QoS::AtLeastOnce, message.retain, payload.as_slice())
                            .await
                        {
                            Ok(_) => {
                                if let Ok(mut stats) = self.shared_stats.lock() {
                                    stats.mqtt_messages_sent += 1;
                                }
                                break;
                            }
                            Err(err) => {
                                error!(
                                    "MQTT publish to {} failed: {:?} (attempt {}/{})",
                                    topic, err, attempt, MAX_PUBLISH_ATTEMPTS
                                );
                                if let Ok(mut stats) = self.shared_stats.lock() {
                                    stats.mqtt_errors += 1;
                                }
                                if attempt < MAX_PUBLISH_ATTEMPTS {
                                    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                                }
                            }
                        }
                    }
                }
            }
        }

        info!("MQTT sender loop exiting");
        Ok(())
    }

    fn lwt_topic(&self) -> String {
        format!("{}/LWT", self.config.mqtt().namespace())
    }
}

// remove the namespace, including the first /
// doing it this way means we don't break if namespace happens to contain a /
fn strip_namespace<'a>(topic: &'a str, namespace: &str) -> Option<&'a str> {
    topic.strip_prefix(namespace)?.strip_prefix('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(topic: &str, payload: &str) -> Message {
        Message {
            topic: topic.to_string(),
            retain: false,
            payload: payload.to_string(),
        }
    }

    #[test]
    fn control_commands() {
        assert_eq!(
            message("control/output_mode/set", "UTI\n").to_command().unwrap(),
            Command::SetControl(ControlKind::OutputMode, "UTI".to_string())
        );
        assert_eq!(
            message("control/ac_charge_current/set", "30").to_command().unwrap(),
            Command::SetControl(ControlKind::AcChargeCurrent, "30".to_string())
        );
        assert!(message("control/nope/set", "1").to_command().is_err());
        assert!(message("control/output_mode/state", "UTI").to_command().is_err());
    }

    #[test]
    fn raw_config_commands() {
        assert_eq!(
            message("cmd/config/BuzzerEnable", "false").to_command().unwrap(),
            Command::WriteConfig("BuzzerEnable".to_string(), "false".to_string())
        );
        assert!(message("cmd/config", "1").to_command().is_err());
        assert!(message("cmd/config/", "1").to_command().is_err());
    }

    fn mqtt(channels: &Channels) -> Mqtt {
        let config = Config::from_yaml("inverter:\n  url: http://127.0.0.1:9\nmqtt:\n  host: localhost\n").unwrap();
        Mqtt::new(
            ConfigWrapper::from_config(config),
            channels.clone(),
            Arc::new(Mutex::new(Stats::default())),
        )
    }

    #[tokio::test]
    async fn incoming_commands_are_forwarded() {
        let channels = Channels::new();
        let mut from_mqtt = channels.from_mqtt.subscribe();

        let publish = Publish::new("growatt/control/output_mode/set", QoS::AtMostOnce, "UTI");
        mqtt(&channels).handle_message(publish).unwrap();

        assert_eq!(
            from_mqtt.try_recv().unwrap(),
            ChannelData::Message(message("control/output_mode/set", "UTI"))
        );
    }

    #[tokio::test]
    async fn non_utf8_payload_is_dropped() {
        let channels = Channels::new();
        let mut from_mqtt = channels.from_mqtt.subscribe();

        let publish = Publish::new("growatt/control/output_mode/set", QoS::AtMostOnce, vec![0xff, 0xfe]);
        assert!(mqtt(&channels).handle_message(publish).is_ok());
        assert!(from_mqtt.try_recv().is_err());
    }

    #[tokio::test]
    async fn retained_commands_are_dropped() {
        let channels = Channels::new();
        let mut from_mqtt = channels.from_mqtt.subscribe();

        let mut publish = Publish::new("growatt/cmd/config/BuzzerEN", QoS::AtMostOnce, "1");
        publish.retain = true;
        mqtt(&channels).handle_message(publish).unwrap();
        assert!(from_mqtt.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscribes_to_both_command_trees() {
        let channels = Channels::new();
        assert_eq!(
            mqtt(&channels).subscriptions(),
            vec!["growatt/control/+/set".to_string(), "growatt/cmd/config/+".to_string()]
        );
    }

    #[tokio::test]
    async fn connack_runs_setup() {
        let channels = Channels::new();
        // room for exactly one setup: online + two subscribes
        let (client, _eventloop) = AsyncClient::new(MqttOptions::new("test", "localhost", 1883), 3);
        assert!(client.try_publish("x", QoS::AtMostOnce, false, "").is_ok());

        let (client, _eventloop) = AsyncClient::new(MqttOptions::new("test", "localhost", 1883), 3);
        let connack = Event::Incoming(Incoming::ConnAck(rumqttc::ConnAck::new(
            rumqttc::ConnectReturnCode::Success,
            false,
        )));
        mqtt(&channels).handle_event(connack, &client);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        // setup filled the request buffer
        assert!(client.try_publish("x", QoS::AtMostOnce, false, "").is_err());
    }

    #[test]
    fn namespace_stripping() {
        assert_eq!(strip_namespace("growatt/control/x/set", "growatt"), Some("control/x/set"));
        assert_eq!(strip_namespace("home/growatt/cmd/config/a", "home/growatt"), Some("cmd/config/a"));
        assert_eq!(strip_namespace("growattx/control", "growatt"), None);
        assert_eq!(strip_namespace("other/control", "growatt"), None);
    }
}
