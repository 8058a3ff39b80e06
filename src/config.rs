use crate::prelude::*;

use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use serde_yaml;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub inverter: Inverter,

    #[serde(default = "Config::default_mqtt")]
    pub mqtt: Mqtt,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Inverter {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Inverter {
    /// Base URL of the bridge server, eg http://192.168.1.50:8080
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,

    /// Used for Home Assistant device identifiers
    #[serde(default = "Config::default_inverter_name")]
    pub name: String,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_poll_interval")]
    pub poll_interval: Duration,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_request_timeout")]
    pub request_timeout: Duration,

    pub poll_config: Option<bool>,
    pub read_only: Option<bool>,
}
impl Inverter {
    pub fn url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn poll_config(&self) -> bool {
        self.poll_config.unwrap_or(true)
    }

    pub fn read_only(&self) -> bool {
        self.read_only == Some(true)
    }
} // }}}

// HomeAssistant {{{
#[derive(Clone, Debug, Deserialize)]
pub struct HomeAssistant {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default = "Config::default_mqtt_homeassistant_prefix")]
    pub prefix: String,
}

impl HomeAssistant {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
} // }}}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default = "Config::default_mqtt_namespace")]
    pub namespace: String,

    #[serde(default = "Config::default_mqtt_homeassistant")]
    pub homeassistant: HomeAssistant,
}
impl Mqtt {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn homeassistant(&self) -> &HomeAssistant {
        &self.homeassistant
    }
} // }}}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Config> {
        // config is only ever replaced wholesale, a poisoned lock still holds a usable value
        self.config.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn inverter(&self) -> Inverter {
        self.lock().inverter.clone()
    }

    pub fn mqtt(&self) -> Mqtt {
        self.lock().mqtt.clone()
    }

    pub fn loglevel(&self) -> String {
        self.lock().loglevel.clone()
    }

    pub fn read_only(&self) -> bool {
        self.lock().inverter.read_only()
    }

    pub fn homeassistant_enabled(&self) -> bool {
        let mqtt = self.mqtt();
        mqtt.enabled() && mqtt.homeassistant().enabled()
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("config.rs:error reading {}: {}", file, err))?;

        Self::from_yaml(&content).map_err(|err| anyhow!("config.rs:{}: {}", file, err))
    }

    pub fn log_summary(&self) {
        info!("Configuration loaded successfully:");
        info!("  Inverter:");
        info!("    URL: {}", self.inverter.url());
        info!("    Name: {}", self.inverter.name);
        info!("    Auth: {}", if self.inverter.username.is_some() { "basic" } else { "none" });
        info!("    Poll Interval: {}s", self.inverter.poll_interval.as_secs());
        info!("    Request Timeout: {}s", self.inverter.request_timeout.as_secs());
        info!("    Poll Config: {}", self.inverter.poll_config());
        info!("    Read Only: {}", self.inverter.read_only());

        info!("  MQTT: {}", if self.mqtt.enabled { "enabled" } else { "disabled" });
        if self.mqtt.enabled {
            info!("    Host: {}", self.mqtt.host);
            info!("    Port: {}", self.mqtt.port);
            info!("    Namespace: {}", self.mqtt.namespace);
            info!("    Home Assistant: {}", if self.mqtt.homeassistant.enabled { "enabled" } else { "disabled" });
        }

        info!("  Log Level: {}", self.loglevel);
    }

    /// Parses and validates a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        match url::Url::parse(&self.inverter.url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => bail!("inverter.url must be http or https, got {}", url.scheme()),
            Err(e) => return Err(anyhow!("config.rs:Invalid inverter URL: {}", e)),
        }

        if self.inverter.username.is_some() != self.inverter.password.is_some() {
            bail!("inverter.username and inverter.password must be set together");
        }

        if self.inverter.poll_interval.is_zero() {
            bail!("inverter.poll_interval must be at least 1 second");
        }
        if self.inverter.request_timeout.is_zero() {
            bail!("inverter.request_timeout must be at least 1 second");
        }

        if self.mqtt.enabled {
            if self.mqtt.port == 0 {
                bail!("mqtt.port must be between 1 and 65535");
            }
            if self.mqtt.host.is_empty() {
                return Err(anyhow!("config.rs:MQTT host cannot be empty"));
            }
            if self.mqtt.namespace.is_empty() || self.mqtt.namespace.contains(['+', '#']) {
                bail!("mqtt.namespace must be non-empty and contain no wildcards");
            }
        }

        Ok(())
    }

    fn default_mqtt() -> Mqtt {
        Mqtt {
            enabled: false,
            host: String::new(),
            port: Self::default_mqtt_port(),
            username: None,
            password: None,
            namespace: Self::default_mqtt_namespace(),
            homeassistant: Self::default_mqtt_homeassistant(),
        }
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_namespace() -> String {
        "growatt".to_string()
    }

    fn default_mqtt_homeassistant() -> HomeAssistant {
        HomeAssistant {
            enabled: Self::default_enabled(),
            prefix: Self::default_mqtt_homeassistant_prefix(),
        }
    }

    fn default_mqtt_homeassistant_prefix() -> String {
        "homeassistant".to_string()
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }

    fn default_inverter_name() -> String {
        "inverter".to_string()
    }

    fn default_poll_interval() -> Duration {
        Duration::from_secs(30)
    }

    fn default_request_timeout() -> Duration {
        Duration::from_secs(10)
    }
}
