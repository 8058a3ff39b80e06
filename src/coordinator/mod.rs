use crate::prelude::*;

pub mod commands;

use crate::entity_store::EntityStore;
use crate::inverter::InverterClient;
use crate::metrics::{system_status_identifier, MetricPublisher};
use crate::mirror::SettingMirror;
use commands::write_config::WriteConfig;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelData {
    Snapshot(StatusSnapshot),
    PollFailed {
        error: BridgeError,
        unavailable_count: u64,
    },
    Command(Command),
    WriteFinished {
        kind: ControlKind,
        generation: u64,
        result: Result<(), BridgeError>,
    },
    RawWriteFinished {
        key: String,
        value: String,
        result: Result<(), BridgeError>,
    },
    Shutdown,
}

#[derive(Default, Debug)]
pub struct Stats {
    pub polls_ok: u64,
    pub unavailable_count: u64,
    pub metrics_published: u64,
    pub mirror_updates: u64,
    pub writes_succeeded: u64,
    pub writes_failed: u64,
    pub writes_superseded: u64,
    pub writes_refused: u64,
    pub mqtt_messages_sent: u64,
    pub mqtt_errors: u64,
    pub last_error: Option<String>,
}

impl Stats {
    pub fn print_summary(&self) {
        info!("Statistics:");
        info!("  Inverter:");
        info!("    Successful polls: {}", self.polls_ok);
        info!("    Unavailable: {}", self.unavailable_count);
        info!("    Metrics published: {}", self.metrics_published);
        info!("    Settings mirrored from device: {}", self.mirror_updates);
        info!("  Writes:");
        info!("    Succeeded: {}", self.writes_succeeded);
        info!("    Failed: {}", self.writes_failed);
        info!("    Superseded: {}", self.writes_superseded);
        info!("    Refused: {}", self.writes_refused);
        info!("  MQTT:");
        info!("    Messages sent: {}", self.mqtt_messages_sent);
        info!("    Errors: {}", self.mqtt_errors);
        if let Some(err) = &self.last_error {
            info!("  Last error: {}", err);
        }
    }
}

/// Owns the entity store and applies every state change, one event at a
/// time, in the order events arrive on `to_coordinator`.
pub struct Coordinator {
    config: ConfigWrapper,
    channels: Channels,
    receiver: broadcast::Receiver<ChannelData>,
    mqtt_receiver: Option<broadcast::Receiver<mqtt::ChannelData>>,
    mqtt_enabled: bool,
    client: InverterClient,
    store: EntityStore,
    publisher: MetricPublisher,
    mirror: SettingMirror,
    in_flight: HashMap<ControlKind, JoinHandle<()>>,
    // raw config writes routed through a control, waiting for their result
    raw_via_control: HashMap<ControlKind, (u64, Command)>,
    pub stats: Arc<Mutex<Stats>>,
}

impl Coordinator {
    pub fn new(config: ConfigWrapper, channels: Channels, client: InverterClient) -> Self {
        // subscribe now so nothing sent before start() is lost
        let receiver = channels.to_coordinator.subscribe();
        let mqtt_receiver = Some(channels.from_mqtt.subscribe());

        Self {
            mqtt_enabled: config.mqtt().enabled(),
            config,
            channels,
            receiver,
            mqtt_receiver,
            client,
            store: EntityStore::new(),
            publisher: MetricPublisher::default(),
            mirror: SettingMirror::new(),
            in_flight: HashMap::new(),
            raw_via_control: HashMap::new(),
            stats: Arc::new(Mutex::new(Stats::default())),
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        let mqtt_receiver = self.mqtt_receiver.take();
        let to_coordinator = self.channels.to_coordinator.clone();

        match mqtt_receiver {
            Some(receiver) if self.mqtt_enabled => {
                futures::try_join!(Self::mqtt_receiver(receiver, to_coordinator), self.event_loop())?;
            }
            _ => self.event_loop().await?,
        }

        Ok(())
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    // mqtt -> coordinator. Turns command topics into events on our own queue so
    // they are ordered with everything else.
    async fn mqtt_receiver(
        mut receiver: broadcast::Receiver<mqtt::ChannelData>,
        to_coordinator: broadcast::Sender<ChannelData>,
    ) -> Result<()> {
        loop {
            let message = match receiver.recv().await {
                Ok(mqtt::ChannelData::Message(message)) => message,
                Ok(mqtt::ChannelData::Shutdown) => break,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("mqtt receiver lagged {} messages", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match message.to_command() {
                Ok(command) => {
                    debug!("parsed command {:?}", command);
                    if to_coordinator.send(ChannelData::Command(command)).is_err() {
                        bail!("send(to_coordinator) failed - channel closed?");
                    }
                }
                Err(err) => warn!("{}", err),
            }
        }

        Ok(())
    }

    async fn event_loop(&mut self) -> Result<()> {
        loop {
            let event = self.next_event().await;
            if !self.process(event) {
                break;
            }
        }

        info!("coordinator shutting down");
        for (_, handle) in self.in_flight.drain() {
            handle.abort();
        }
        Ok(())
    }

    pub async fn next_event(&mut self) -> ChannelData {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("coordinator lagged {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return ChannelData::Shutdown,
            }
        }
    }

    /// Applies one event. Returns `false` once shutdown was requested.
    pub fn process(&mut self, event: ChannelData) -> bool {
        use ChannelData::*;

        match event {
            Shutdown => return false,
            Snapshot(snapshot) => self.process_snapshot(&snapshot),
            PollFailed {
                error,
                unavailable_count,
            } => self.process_poll_failure(error, unavailable_count),
            Command(command) => self.process_command(command),
            WriteFinished {
                kind,
                generation,
                result,
            } => self.process_write_finished(kind, generation, result),
            RawWriteFinished { key, value, result } => {
                self.process_raw_write_finished(&key, &value, result)
            }
        }

        true
    }

    fn process_snapshot(&mut self, snapshot: &StatusSnapshot) {
        let metrics = self.publisher.publish(snapshot);

        for metric in &metrics {
            self.store.record_metric(metric);
            self.publish_message(format!("sensor/{}", metric.identifier), metric.value.to_string(), true);
        }

        if let Some(status) = self.publisher.system_status(snapshot) {
            let identifier = system_status_identifier();
            self.store.set_text(&identifier, &status);
            self.publish_message(format!("sensor/{}", identifier), status, true);
        }

        let mirrored = self.mirror.reconcile(snapshot, self.store.controls_mut());
        for setting in &mirrored {
            self.control_changed(*setting, Origin::Device);
        }

        if let Ok(mut stats) = self.stats.lock() {
            stats.polls_ok += 1;
            stats.metrics_published += metrics.len() as u64;
            stats.mirror_updates += mirrored.len() as u64;
        }

        debug!(
            "snapshot from {}: {} metrics, {} settings mirrored",
            snapshot.time(),
            metrics.len(),
            mirrored.len()
        );
    }

    fn process_poll_failure(&mut self, error: BridgeError, unavailable_count: u64) {
        if error.is_auth() {
            error!("inverter rejected our credentials: {}", error);
        } else {
            warn!("inverter unavailable: {}", error);
        }

        if let Ok(mut stats) = self.stats.lock() {
            stats.unavailable_count = unavailable_count;
            stats.last_error = Some(error.to_string());
        }

        self.publish_message(
            "diagnostic/unavailable_count".to_string(),
            unavailable_count.to_string(),
            true,
        );
    }

    fn process_command(&mut self, command: Command) {
        match command {
            Command::SetControl(kind, payload) => {
                self.set_control(kind, &payload);
            }
            Command::WriteConfig(key, value) => {
                match ControlKind::ALL.into_iter().find(|k| k.key() == key) {
                    Some(kind) => self.write_raw_control(kind, key, value),
                    None => self.write_raw(key, value),
                }
            }
        }
    }

    // The three mirrored settings always go through their control, but the
    // sender still gets its answer on result/config/{key}.
    fn write_raw_control(&mut self, kind: ControlKind, key: String, value: String) {
        if crate::snapshot::is_sentinel(&value) {
            debug!("ignoring {} for {}", value.trim(), key);
            return;
        }

        let generation = self.set_control(kind, &value);
        let command = Command::WriteConfig(key, value);
        match generation {
            Some(generation) => {
                self.raw_via_control.insert(kind, (generation, command));
            }
            None => self.publish_raw_result(&command, false),
        }
    }

    /// Returns the generation of the write that was started, if any.
    fn set_control(&mut self, kind: ControlKind, payload: &str) -> Option<u64> {
        if crate::snapshot::is_sentinel(payload) {
            debug!("ignoring {} for {}", payload.trim(), kind.slug());
            return None;
        }

        match kind.parse_user(payload) {
            Ok(setting) => self.control_changed(setting, Origin::User),
            Err(err) => {
                warn!("refusing {} for {}: {}", payload, kind.name(), err);
                if let Ok(mut stats) = self.stats.lock() {
                    stats.writes_refused += 1;
                }
                self.publish_message(format!("control/{}/error", kind.slug()), err.to_string(), true);
                // put the UI back on the value we actually have
                self.publish_control_state(kind);
                None
            }
        }
    }

    /// Single entry point for control value changes. Only user changes get
    /// written to the inverter.
    fn control_changed(&mut self, setting: Setting, origin: Origin) -> Option<u64> {
        let generation = match origin {
            Origin::User => Some(self.start_write(setting)),
            Origin::Device => None,
        };

        self.publish_control_state(setting.kind());
        generation
    }

    fn start_write(&mut self, setting: Setting) -> u64 {
        let kind = setting.kind();
        let generation = self.store.controls_mut().get_mut(kind).begin_write(setting);

        // its result will be discarded as stale
        if let Some((_, command)) = self.raw_via_control.remove(&kind) {
            self.publish_raw_result(&command, false);
        }

        if let Some(previous) = self.in_flight.remove(&kind) {
            if !previous.is_finished() {
                info!("{} superseded by {}", kind.name(), setting);
                previous.abort();
                if let Ok(mut stats) = self.stats.lock() {
                    stats.writes_superseded += 1;
                }
            }
        }

        let write = WriteConfig::for_setting(self.client.clone(), self.config.read_only(), setting);
        let to_coordinator = self.channels.to_coordinator.clone();

        let handle = tokio::spawn(async move {
            let result = write.run().await;
            let _ = to_coordinator.send(ChannelData::WriteFinished {
                kind,
                generation,
                result,
            });
        });

        self.in_flight.insert(kind, handle);
        generation
    }

    fn process_write_finished(&mut self, kind: ControlKind, generation: u64, result: Result<(), BridgeError>) {
        let control = self.store.controls_mut().get_mut(kind);
        if !control.finish_write(generation, result.clone()) {
            debug!(
                "discarding stale result for {} (generation {}, current {})",
                kind.name(),
                generation,
                control.generation()
            );
            return;
        }

        self.in_flight.remove(&kind);

        let error_payload = match result {
            Ok(()) => {
                info!("{} written", kind.name());
                if let Ok(mut stats) = self.stats.lock() {
                    stats.writes_succeeded += 1;
                }
                String::new()
            }
            Err(err) => {
                error!("writing {} failed: {}", kind.name(), err);
                if let Ok(mut stats) = self.stats.lock() {
                    stats.writes_failed += 1;
                    stats.last_error = Some(err.to_string());
                }
                err.to_string()
            }
        };

        self.publish_message(format!("control/{}/error", kind.slug()), error_payload.clone(), true);

        if let Some((pending, command)) = self.raw_via_control.remove(&kind) {
            if pending == generation {
                self.publish_raw_result(&command, error_payload.is_empty());
            } else {
                self.raw_via_control.insert(kind, (pending, command));
            }
        }
    }

    fn write_raw(&mut self, key: String, value: String) {
        if crate::snapshot::is_sentinel(&value) {
            debug!("ignoring {} for {}", value.trim(), key);
            return;
        }

        if let Err(err) = commands::validate_config_write(&key, &value) {
            warn!("refusing {}={}: {}", key, value, err);
            if let Ok(mut stats) = self.stats.lock() {
                stats.writes_refused += 1;
            }
            self.publish_raw_result(&Command::WriteConfig(key, value), false);
            return;
        }

        let write = WriteConfig::new(self.client.clone(), self.config.read_only(), key.clone(), value.clone());
        let to_coordinator = self.channels.to_coordinator.clone();

        tokio::spawn(async move {
            let result = write.run().await;
            let _ = to_coordinator.send(ChannelData::RawWriteFinished { key, value, result });
        });
    }

    fn process_raw_write_finished(&mut self, key: &str, value: &str, result: Result<(), BridgeError>) {
        let ok = match result {
            Ok(()) => {
                if let Ok(mut stats) = self.stats.lock() {
                    stats.writes_succeeded += 1;
                }
                true
            }
            Err(err) => {
                error!("writing {}={} failed: {}", key, value, err);
                if let Ok(mut stats) = self.stats.lock() {
                    stats.writes_failed += 1;
                    stats.last_error = Some(err.to_string());
                }
                false
            }
        };

        self.publish_raw_result(&Command::WriteConfig(key.to_string(), value.to_string()), ok);
    }

    fn publish_raw_result(&self, command: &Command, ok: bool) {
        let Some(topic) = command.to_result_topic() else {
            return;
        };
        let payload = if ok { "OK" } else { "FAIL" };
        self.publish_message(topic, payload.to_string(), false);
    }

    fn publish_control_state(&self, kind: ControlKind) {
        if let Some(setting) = self.store.control(kind).value() {
            self.publish_message(format!("control/{}/state", kind.slug()), setting.value(), true);
        }
    }

    fn publish_message(&self, topic: String, payload: String, retain: bool) {
        if !self.mqtt_enabled {
            return;
        }

        let message = mqtt::Message {
            topic,
            retain,
            payload,
        };
        if self
            .channels
            .to_mqtt
            .send(mqtt::ChannelData::Message(message))
            .is_err()
        {
            // mqtt not connected yet (or gone); the next poll republishes
            debug!("send(to_mqtt) failed - channel closed?");
            if let Ok(mut stats) = self.stats.lock() {
                stats.mqtt_errors += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::{ChargeMode, OutputMode, WriteState};

    fn coordinator(mqtt: bool) -> (Coordinator, Channels) {
        let yaml = if mqtt {
            "inverter:\n  url: http://127.0.0.1:9\nmqtt:\n  host: localhost\n"
        } else {
            "inverter:\n  url: http://127.0.0.1:9\n"
        };
        let config = ConfigWrapper::from_config(Config::from_yaml(yaml).unwrap());
        let channels = Channels::new();
        let client = InverterClient::new(&config.inverter()).unwrap();
        (Coordinator::new(config, channels.clone(), client), channels)
    }

    fn snapshot(body: &str) -> StatusSnapshot {
        StatusSnapshot::from_json(body, chrono::Utc::now()).unwrap()
    }

    fn drain(receiver: &mut broadcast::Receiver<mqtt::ChannelData>) -> Vec<mqtt::Message> {
        let mut r = Vec::new();
        while let Ok(mqtt::ChannelData::Message(m)) = receiver.try_recv() {
            r.push(m);
        }
        r
    }

    #[tokio::test]
    async fn snapshot_publishes_metrics_and_mirrors_settings() {
        let (mut c, channels) = coordinator(true);
        let mut to_mqtt = channels.to_mqtt.subscribe();

        c.process(ChannelData::Snapshot(snapshot(
            r#"{"SystemStatus":"Normal","PV1Volt":301.5,"BatterySOC":"unknown","ChargeConfig":"PV Only"}"#,
        )));

        let messages = drain(&mut to_mqtt);
        let find = |t: &str| messages.iter().find(|m| m.topic == t).map(|m| m.payload.clone());

        assert_eq!(find("sensor/growatt_pv1_voltage").as_deref(), Some("301.5"));
        assert_eq!(find("sensor/growatt_system_status").as_deref(), Some("Normal"));
        assert_eq!(find("control/charge_mode/state").as_deref(), Some("PV Only"));
        assert!(messages.iter().all(|m| !m.topic.contains("soc")));

        assert_eq!(
            c.store().control(ControlKind::ChargeMode).value(),
            Some(Setting::ChargeMode(ChargeMode::PvOnly))
        );
        assert!(c.in_flight.is_empty());
        assert_eq!(c.stats.lock().unwrap().mirror_updates, 1);
    }

    #[tokio::test]
    async fn poll_failure_publishes_counter() {
        let (mut c, channels) = coordinator(true);
        let mut to_mqtt = channels.to_mqtt.subscribe();

        c.process(ChannelData::PollFailed {
            error: BridgeError::Transport("timeout".to_string()),
            unavailable_count: 3,
        });

        let messages = drain(&mut to_mqtt);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "diagnostic/unavailable_count");
        assert_eq!(messages[0].payload, "3");
        assert_eq!(c.stats.lock().unwrap().unavailable_count, 3);
    }

    #[tokio::test]
    async fn sentinel_commands_are_ignored() {
        let (mut c, channels) = coordinator(true);
        let mut to_mqtt = channels.to_mqtt.subscribe();

        c.process(ChannelData::Command(Command::SetControl(
            ControlKind::OutputMode,
            "unavailable".to_string(),
        )));

        assert!(drain(&mut to_mqtt).is_empty());
        assert!(c.in_flight.is_empty());
        assert_eq!(c.store().control(ControlKind::OutputMode).value(), None);
    }

    #[tokio::test]
    async fn refused_value_surfaces_error_and_restores_state() {
        let (mut c, channels) = coordinator(true);
        let mut to_mqtt = channels.to_mqtt.subscribe();

        c.process(ChannelData::Snapshot(snapshot(r#"{"ACChargeAmps":20}"#)));
        drain(&mut to_mqtt);

        c.process(ChannelData::Command(Command::SetControl(
            ControlKind::AcChargeCurrent,
            "83".to_string(),
        )));

        let messages = drain(&mut to_mqtt);
        assert_eq!(messages[0].topic, "control/ac_charge_current/error");
        assert_eq!(messages[1].topic, "control/ac_charge_current/state");
        assert_eq!(messages[1].payload, "20");
        assert!(c.in_flight.is_empty());
        assert_eq!(c.stats.lock().unwrap().writes_refused, 1);
    }

    #[tokio::test]
    async fn stale_write_results_are_discarded() {
        let (mut c, _channels) = coordinator(false);

        c.process(ChannelData::Command(Command::SetControl(
            ControlKind::OutputMode,
            "UTI".to_string(),
        )));
        c.process(ChannelData::Command(Command::SetControl(
            ControlKind::OutputMode,
            "SOL".to_string(),
        )));

        let control = c.store().control(ControlKind::OutputMode);
        assert_eq!(control.generation(), 2);
        assert!(control.is_pending());

        // a result for the first write arriving late changes nothing
        c.process(ChannelData::WriteFinished {
            kind: ControlKind::OutputMode,
            generation: 1,
            result: Err(BridgeError::Transport("aborted".to_string())),
        });

        let control = c.store().control(ControlKind::OutputMode);
        assert_eq!(control.state(), &WriteState::PendingWrite);
        assert_eq!(control.value(), Some(Setting::OutputMode(OutputMode::Sol)));
    }

    #[tokio::test]
    async fn non_writable_raw_key_is_refused() {
        let (mut c, channels) = coordinator(true);
        let mut to_mqtt = channels.to_mqtt.subscribe();

        c.process(ChannelData::Command(Command::WriteConfig(
            "FWVersion".to_string(),
            "1".to_string(),
        )));

        let messages = drain(&mut to_mqtt);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "result/config/FWVersion");
        assert_eq!(messages[0].payload, "FAIL");
    }

    #[tokio::test]
    async fn raw_write_of_control_key_answers_on_result_topic() {
        let (mut c, channels) = coordinator(true);
        let mut to_mqtt = channels.to_mqtt.subscribe();
        let result = |messages: &[mqtt::Message]| {
            messages
                .iter()
                .find(|m| m.topic.starts_with("result/config/"))
                .map(|m| (m.topic.clone(), m.payload.clone()))
        };

        c.process(ChannelData::Command(Command::WriteConfig(
            "ACChargeAmps".to_string(),
            "83".to_string(),
        )));
        assert_eq!(
            result(&drain(&mut to_mqtt)),
            Some(("result/config/ACChargeAmps".to_string(), "FAIL".to_string()))
        );

        c.process(ChannelData::Command(Command::WriteConfig(
            "OutputConfig".to_string(),
            "UTI".to_string(),
        )));
        assert_eq!(result(&drain(&mut to_mqtt)), None);

        c.process(ChannelData::WriteFinished {
            kind: ControlKind::OutputMode,
            generation: 1,
            result: Ok(()),
        });
        assert_eq!(
            result(&drain(&mut to_mqtt)),
            Some(("result/config/OutputConfig".to_string(), "OK".to_string()))
        );
    }

    #[tokio::test]
    async fn superseded_raw_write_of_control_key_fails() {
        let (mut c, channels) = coordinator(true);
        let mut to_mqtt = channels.to_mqtt.subscribe();

        c.process(ChannelData::Command(Command::WriteConfig(
            "ChargeConfig".to_string(),
            "PV Only".to_string(),
        )));
        drain(&mut to_mqtt);

        c.process(ChannelData::Command(Command::SetControl(
            ControlKind::ChargeMode,
            "PV First".to_string(),
        )));
        let messages = drain(&mut to_mqtt);
        let fail = messages.iter().find(|m| m.topic == "result/config/ChargeConfig").unwrap();
        assert_eq!(fail.payload, "FAIL");

        // the newer write finishing says nothing more about the raw one
        c.process(ChannelData::WriteFinished {
            kind: ControlKind::ChargeMode,
            generation: 2,
            result: Ok(()),
        });
        assert!(drain(&mut to_mqtt).iter().all(|m| !m.topic.starts_with("result/")));
    }

    #[tokio::test]
    async fn shutdown_stops_processing() {
        let (mut c, _channels) = coordinator(false);
        assert!(!c.process(ChannelData::Shutdown));
    }
}
