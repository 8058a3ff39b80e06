use crate::inverter::InverterClient;
use crate::prelude::*;

/// A single `PUT /config` against the inverter. No retry: a failed write is
/// reported back and the user decides whether to try again.
pub struct WriteConfig {
    client: InverterClient,
    read_only: bool,
    key: String,
    value: String,
}

impl WriteConfig {
    pub fn new<K, V>(client: InverterClient, read_only: bool, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            client,
            read_only,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn for_setting(client: InverterClient, read_only: bool, setting: Setting) -> Self {
        Self::new(client, read_only, setting.kind().key(), setting.value())
    }

    pub async fn run(&self) -> Result<(), BridgeError> {
        if self.read_only {
            return Err(BridgeError::InvalidValue(format!(
                "not writing {}={}, inverter is configured read-only",
                self.key, self.value
            )));
        }

        info!("[write_config] {}={}", self.key, self.value);

        match self.client.write_config(&self.key, &self.value).await {
            Ok(()) => {
                debug!("[write_config] {}={} accepted", self.key, self.value);
                Ok(())
            }
            Err(err) => {
                warn!("[write_config] {}={} failed: {}", self.key, self.value, err);
                Err(err)
            }
        }
    }
}
