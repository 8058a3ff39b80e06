pub use anyhow::{anyhow, bail, Error, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::io::Write;
pub use std::str::FromStr;
pub use tokio::sync::broadcast;

pub use crate::channels::Channels;
pub use crate::command::Command;
pub use crate::config::{self, Config, ConfigWrapper};
pub use crate::controls::{ControlKind, Origin, Setting};
pub use crate::coordinator;
pub use crate::error::BridgeError;
pub use crate::home_assistant;
pub use crate::inverter;
pub use crate::mqtt;
pub use crate::options::Options;
pub use crate::snapshot::{FieldValue, StatusSnapshot};
