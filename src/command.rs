use crate::prelude::*;

/// Requests coming in from MQTT, already stripped of the namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// User picked a new value for one of the mirrored controls; the payload
    /// is validated by the coordinator.
    SetControl(ControlKind, String),
    /// Raw `key=value` write to the inverter config.
    WriteConfig(String, String),
}

impl Command {
    /// Where the `OK`/`FAIL` answer to a raw config write goes. Control
    /// changes report on `control/{slug}/error` instead.
    pub fn to_result_topic(&self) -> Option<String> {
        use Command::*;

        match self {
            SetControl(..) => None,
            WriteConfig(key, _) => Some(format!("result/config/{}", key)),
        }
    }
}
