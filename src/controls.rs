use crate::prelude::*;
use crate::snapshot::FieldValue;

use serde::Serialize;
use std::collections::HashMap;

// OutputMode {{{
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum OutputMode {
    /// Solar, battery, then utility
    Sbu,
    /// Solar first
    Sol,
    /// Utility first
    Uti,
    /// Solar, utility, then battery
    Sub,
}

impl OutputMode {
    pub const ALL: [OutputMode; 4] = [OutputMode::Sbu, OutputMode::Sol, OutputMode::Uti, OutputMode::Sub];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMode::Sbu => "SBU",
            OutputMode::Sol => "SOL",
            OutputMode::Uti => "UTI",
            OutputMode::Sub => "SUB",
        }
    }
}

impl FromStr for OutputMode {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s.trim())
            .ok_or_else(|| BridgeError::InvalidValue(format!("unknown output mode {:?}", s)))
    }
} // }}}

// ChargeMode {{{
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ChargeMode {
    PvFirst,
    PvAndUti,
    PvOnly,
}

impl ChargeMode {
    pub const ALL: [ChargeMode; 3] = [ChargeMode::PvFirst, ChargeMode::PvAndUti, ChargeMode::PvOnly];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeMode::PvFirst => "PV First",
            ChargeMode::PvAndUti => "PV&UTI",
            ChargeMode::PvOnly => "PV Only",
        }
    }
}

impl FromStr for ChargeMode {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s.trim())
            .ok_or_else(|| BridgeError::InvalidValue(format!("unknown charge mode {:?}", s)))
    }
} // }}}

// ChargeCurrent {{{
/// Utility (AC) charge current in amps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ChargeCurrent(u8);

impl ChargeCurrent {
    pub const MIN: u8 = 0;
    pub const MAX: u8 = 80;
    pub const STEP: u8 = 5;

    /// Strict constructor for user input: whole multiples of 5 in 0..=80.
    /// Anything else is rejected rather than rounded.
    pub fn new(amps: f64) -> Result<Self, BridgeError> {
        if !amps.is_finite() || amps.fract() != 0.0 {
            return Err(BridgeError::InvalidValue(format!(
                "charge current {} is not a whole number of amps",
                amps
            )));
        }
        if amps < Self::MIN as f64 || amps > Self::MAX as f64 {
            return Err(BridgeError::InvalidValue(format!(
                "charge current {} outside {}..={}",
                amps,
                Self::MIN,
                Self::MAX
            )));
        }
        let amps = amps as u8;
        if amps % Self::STEP != 0 {
            return Err(BridgeError::InvalidValue(format!(
                "charge current {} is not a multiple of {}",
                amps,
                Self::STEP
            )));
        }
        Ok(Self(amps))
    }

    /// Whatever the device reports within range is its actual state, so no
    /// step check here.
    pub fn from_device(amps: f64) -> Option<Self> {
        if amps.is_finite() && amps.fract() == 0.0 && (Self::MIN as f64..=Self::MAX as f64).contains(&amps) {
            Some(Self(amps as u8))
        } else {
            None
        }
    }

    pub fn amps(&self) -> u8 {
        self.0
    }
}

impl FromStr for ChargeCurrent {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let amps: f64 = s
            .trim()
            .parse()
            .map_err(|_| BridgeError::InvalidValue(format!("charge current {:?} is not a number", s)))?;
        Self::new(amps)
    }
} // }}}

// ControlKind {{{
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ControlKind {
    OutputMode,
    ChargeMode,
    AcChargeCurrent,
}

impl ControlKind {
    pub const ALL: [ControlKind; 3] = [
        ControlKind::OutputMode,
        ControlKind::ChargeMode,
        ControlKind::AcChargeCurrent,
    ];

    /// Field name on the inverter, used both for reading and as the write key.
    pub fn key(&self) -> &'static str {
        match self {
            ControlKind::OutputMode => "OutputConfig",
            ControlKind::ChargeMode => "ChargeConfig",
            ControlKind::AcChargeCurrent => "ACChargeAmps",
        }
    }

    /// Topic/entity fragment.
    pub fn slug(&self) -> &'static str {
        match self {
            ControlKind::OutputMode => "output_mode",
            ControlKind::ChargeMode => "charge_mode",
            ControlKind::AcChargeCurrent => "ac_charge_current",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControlKind::OutputMode => "Output Mode",
            ControlKind::ChargeMode => "Charge Mode",
            ControlKind::AcChargeCurrent => "Utility Charge Current",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.slug() == slug)
    }

    /// Parses a user-entered value. Sentinels are an error here; callers
    /// that want to silently ignore them check first.
    pub fn parse_user(&self, value: &str) -> Result<Setting, BridgeError> {
        if crate::snapshot::is_sentinel(value) {
            return Err(BridgeError::InvalidValue(format!("{} is not a real value", value)));
        }

        match self {
            ControlKind::OutputMode => value.parse().map(Setting::OutputMode),
            ControlKind::ChargeMode => value.parse().map(Setting::ChargeMode),
            ControlKind::AcChargeCurrent => value.parse().map(Setting::AcChargeCurrent),
        }
    }

    /// Parses what the inverter reports. `None` for sentinels and anything
    /// outside the control's domain.
    pub fn parse_device(&self, value: &FieldValue) -> Option<Setting> {
        if value.is_sentinel() {
            return None;
        }

        match self {
            ControlKind::OutputMode => value.as_text()?.parse().ok().map(Setting::OutputMode),
            ControlKind::ChargeMode => value.as_text()?.parse().ok().map(Setting::ChargeMode),
            ControlKind::AcChargeCurrent => {
                ChargeCurrent::from_device(value.as_f64()?).map(Setting::AcChargeCurrent)
            }
        }
    }
} // }}}

// Setting {{{
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Setting {
    OutputMode(OutputMode),
    ChargeMode(ChargeMode),
    AcChargeCurrent(ChargeCurrent),
}

impl Setting {
    pub fn kind(&self) -> ControlKind {
        match self {
            Setting::OutputMode(_) => ControlKind::OutputMode,
            Setting::ChargeMode(_) => ControlKind::ChargeMode,
            Setting::AcChargeCurrent(_) => ControlKind::AcChargeCurrent,
        }
    }

    /// The value as written to `/config`.
    pub fn value(&self) -> String {
        match self {
            Setting::OutputMode(m) => m.as_str().to_string(),
            Setting::ChargeMode(m) => m.as_str().to_string(),
            Setting::AcChargeCurrent(c) => c.amps().to_string(),
        }
    }
}

impl std::fmt::Display for Setting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.kind().key(), self.value())
    }
} // }}}

/// Where a control value change came from. Only user changes are written
/// back to the inverter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    User,
    Device,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum WriteState {
    #[default]
    Idle,
    PendingWrite,
    /// Idle, with the error of the last write attempt.
    Failed(BridgeError),
}

// ControlValue {{{
#[derive(Clone, Debug, PartialEq)]
pub struct ControlValue {
    kind: ControlKind,
    value: Option<Setting>,
    state: WriteState,
    generation: u64,
}

impl ControlValue {
    pub fn new(kind: ControlKind) -> Self {
        Self {
            kind,
            value: None,
            state: WriteState::Idle,
            generation: 0,
        }
    }

    pub fn kind(&self) -> ControlKind {
        self.kind
    }

    pub fn value(&self) -> Option<Setting> {
        self.value
    }

    pub fn state(&self) -> &WriteState {
        &self.state
    }

    pub fn is_pending(&self) -> bool {
        self.state == WriteState::PendingWrite
    }

    pub fn last_error(&self) -> Option<&BridgeError> {
        match &self.state {
            WriteState::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Device-originated update. Leaves the write state alone and never
    /// starts a write. Returns whether the value changed.
    pub fn apply_device(&mut self, setting: Setting) -> bool {
        if setting.kind() != self.kind || self.is_pending() || self.value == Some(setting) {
            return false;
        }
        self.value = Some(setting);
        true
    }

    /// User-originated update. The control shows the attempted value right
    /// away and goes to `PendingWrite`; the returned generation tags the
    /// write so a superseded one can be recognised when it completes.
    pub fn begin_write(&mut self, setting: Setting) -> u64 {
        self.value = Some(setting);
        self.state = WriteState::PendingWrite;
        self.generation += 1;
        self.generation
    }

    /// Records the outcome of the write tagged `generation`. Stale
    /// generations are ignored and `false` is returned. The value is not
    /// rolled back on failure.
    pub fn finish_write(&mut self, generation: u64, result: Result<(), BridgeError>) -> bool {
        if generation != self.generation || !self.is_pending() {
            return false;
        }
        self.state = match result {
            Ok(()) => WriteState::Idle,
            Err(err) => WriteState::Failed(err),
        };
        true
    }
} // }}}

#[derive(Clone, Debug)]
pub struct Controls {
    values: HashMap<ControlKind, ControlValue>,
}

impl Default for Controls {
    fn default() -> Self {
        Self::new()
    }
}

impl Controls {
    pub fn new() -> Self {
        Self {
            values: ControlKind::ALL
                .into_iter()
                .map(|k| (k, ControlValue::new(k)))
                .collect(),
        }
    }

    pub fn get(&self, kind: ControlKind) -> &ControlValue {
        // every kind is inserted in new()
        &self.values[&kind]
    }

    pub fn get_mut(&mut self, kind: ControlKind) -> &mut ControlValue {
        self.values.entry(kind).or_insert_with(|| ControlValue::new(kind))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ControlValue> {
        ControlKind::ALL.into_iter().map(move |k| self.get(k))
    }
}
