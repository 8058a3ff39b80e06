use crate::prelude::*;

/// Config keys the bridge server accepts on `PUT /config`. Everything else it
/// reports under `/config` is read-only.
pub const WRITABLE_KEYS: &[&str] = &[
    "OutputConfig",
    "ChargeConfig",
    "UtiOutStart",
    "UtiOutEnd",
    "UtiChargeStart",
    "UtiChargeEnd",
    "PVModel",
    "ACInModel",
    "LCDLanguage",
    "OutputVoltType",
    "OutputFreqType",
    "OverLoadRestart",
    "OverTempRestart",
    "BuzzerEnable",
    "SerialNumber",
    "MoudleH",
    "MoudleL",
    "ComAddress",
    "FlashStart",
    "ResetUserInfo",
    "ResetToFactory",
    "MaxChargeAmps",
    "BulkChargeVolt",
    "FloatChargeVolt",
    "BatLowtoUti",
    "ACChargeAmps",
    "BatteryType",
    "AgingMode",
    "FunctionMask",
    "SafetyType",
    "SysYear",
    "SysMonth",
    "SysDay",
    "SysHour",
    "SysMin",
    "SysSec",
    "SysWeekly",
    "uwBatPieceNum",
    "uwAC2BatVolt",
    "BypEnable",
    "PowSavingEnable",
    "SpowBalEnable",
    "ClrEnergyToday",
    "ClrEnergyAll",
    "BurnInTestEnable",
    "ManualStartEnable",
    "SciLossChkEnable",
    "BlightEnable",
    "LiProtocolType",
    "AudioAlarmEnable",
    "uwEqEnable",
    "uwEqChgVolt",
    "uwEqTime",
    "uwEqTimeOut",
    "uwEqInterval",
    "uwMaxDisChgAmps",
];

/// Keys holding an hour of the day.
const HOUR_KEYS: &[&str] = &["UtiOutStart", "UtiOutEnd", "UtiChargeStart", "UtiChargeEnd"];

pub fn is_writable(key: &str) -> bool {
    WRITABLE_KEYS.contains(&key)
}

/// Checks a raw config write before it is sent. Only the key and the
/// hour-valued keys are checked here; the bridge server rejects bad values
/// for the rest with a 400.
pub fn validate_config_write(key: &str, value: &str) -> Result<(), BridgeError> {
    if !is_writable(key) {
        return Err(BridgeError::InvalidValue(format!("{} is not a writable config key", key)));
    }

    if value.trim().is_empty() {
        return Err(BridgeError::InvalidValue(format!("empty value for {}", key)));
    }

    if HOUR_KEYS.contains(&key) {
        match value.trim().parse::<u8>() {
            Ok(hour) if hour <= 23 => {}
            _ => {
                return Err(BridgeError::InvalidValue(format!(
                    "{} must be an hour between 0 and 23, got {}",
                    key, value
                )))
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_keys_are_writable() {
        for kind in ControlKind::ALL {
            assert!(is_writable(kind.key()), "{}", kind.key());
        }
    }

    #[test]
    fn read_only_keys_are_refused() {
        for key in ["FWVersion", "DTC", "RateWatt", "OnOff", "nonsense"] {
            assert!(matches!(
                validate_config_write(key, "1"),
                Err(BridgeError::InvalidValue(_))
            ));
        }
    }

    #[test]
    fn hour_keys() {
        assert!(validate_config_write("UtiChargeStart", "0").is_ok());
        assert!(validate_config_write("UtiChargeEnd", "23").is_ok());
        assert!(validate_config_write("UtiChargeEnd", "24").is_err());
        assert!(validate_config_write("UtiOutStart", "-1").is_err());
        assert!(validate_config_write("UtiOutStart", "noon").is_err());
    }

    #[test]
    fn empty_values() {
        assert!(validate_config_write("BuzzerEnable", " ").is_err());
        assert!(validate_config_write("BuzzerEnable", "true").is_ok());
    }
}
