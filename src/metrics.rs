use crate::prelude::*;

use serde::Serialize;

pub const IDENTIFIER_PREFIX: &str = "growatt";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Voltage,
    Power,
    ApparentPower,
    Current,
    Energy,
    Temperature,
    Percentage,
    Frequency,
    Duration,
    Diagnostic,
}

impl Category {
    pub fn unit(&self) -> &'static str {
        match self {
            Category::Voltage => "V",
            Category::Power => "W",
            Category::ApparentPower => "VA",
            Category::Current => "A",
            Category::Energy => "kWh",
            Category::Temperature => "°C",
            Category::Percentage => "%",
            Category::Frequency => "Hz",
            Category::Duration => "s",
            Category::Diagnostic => "",
        }
    }

    /// Home Assistant sensor device class, where one exists.
    pub fn device_class(&self) -> Option<&'static str> {
        match self {
            Category::Voltage => Some("voltage"),
            Category::Power => Some("power"),
            Category::ApparentPower => Some("apparent_power"),
            Category::Current => Some("current"),
            Category::Energy => Some("energy"),
            Category::Temperature => Some("temperature"),
            Category::Frequency => Some("frequency"),
            Category::Duration => Some("duration"),
            Category::Percentage | Category::Diagnostic => None,
        }
    }

    pub fn state_class(&self) -> &'static str {
        match self {
            Category::Energy | Category::Duration => "total_increasing",
            _ => "measurement",
        }
    }
}

/// One row of the field table.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MetricSpec {
    pub field: &'static str,
    pub id: &'static str,
    pub name: &'static str,
    pub category: Category,
}

impl MetricSpec {
    const fn new(field: &'static str, id: &'static str, name: &'static str, category: Category) -> Self {
        Self { field, id, name, category }
    }

    /// Stable across restarts: derived from the table only.
    pub fn identifier(&self) -> String {
        format!("{}_{}", IDENTIFIER_PREFIX, self.id)
    }

    pub fn unit(&self) -> &'static str {
        self.category.unit()
    }
}

use Category::*;

pub const STATUS_METRICS: &[MetricSpec] = &[
    MetricSpec::new("PV1Volt", "pv1_voltage", "PV1 Voltage", Voltage),
    MetricSpec::new("PV2Volt", "pv2_voltage", "PV2 Voltage", Voltage),
    MetricSpec::new("PV1Watt", "pv1_power", "PV1 Power", Power),
    MetricSpec::new("PV2Watt", "pv2_power", "PV2 Power", Power),
    MetricSpec::new("PV1Amps", "pv1_current", "PV1 Current", Current),
    MetricSpec::new("PV2Amps", "pv2_current", "PV2 Current", Current),
    MetricSpec::new("OutputWatt", "output_power", "Output Power", Power),
    MetricSpec::new("OutputVA", "output_apparent_power", "Output Apparent Power", ApparentPower),
    MetricSpec::new("ACChrWatt", "ac_charge_power", "AC Charge Power", Power),
    MetricSpec::new("ACChrVA", "ac_charge_apparent_power", "AC Charge Apparent Power", ApparentPower),
    MetricSpec::new("BatteryVolt", "battery_voltage", "Battery Voltage", Voltage),
    MetricSpec::new("BatterySOC", "battery_soc", "Battery SOC", Percentage),
    MetricSpec::new("BusVolt", "bus_voltage", "Bus Voltage", Voltage),
    MetricSpec::new("GridVolt", "grid_voltage", "Grid Voltage", Voltage),
    MetricSpec::new("LineFreq", "grid_frequency", "Grid Frequency", Frequency),
    MetricSpec::new("OutputACVolt", "output_ac_voltage", "Output AC Voltage", Voltage),
    MetricSpec::new("OutputACFreq", "output_ac_frequency", "Output AC Frequency", Frequency),
    MetricSpec::new("OutputDCVolt", "output_dc_voltage", "Output DC Voltage", Voltage),
    MetricSpec::new("InvTempC", "inverter_temperature", "Inverter Temperature", Temperature),
    MetricSpec::new("DCDCTempC", "dcdc_temperature", "DC-DC Temperature", Temperature),
    MetricSpec::new("LoadPercent", "load_percent", "Load", Percentage),
    MetricSpec::new("BatteryPortVolt", "battery_port_voltage", "Battery Port Voltage", Voltage),
    MetricSpec::new("BatteryBusVolt", "battery_bus_voltage", "Battery Bus Voltage", Voltage),
    MetricSpec::new("WorkTimeTotalSeconds", "work_time_total", "Total Work Time", Duration),
    MetricSpec::new("Buck1TempC", "buck1_temperature", "Buck1 Temperature", Temperature),
    MetricSpec::new("Buck2TempC", "buck2_temperature", "Buck2 Temperature", Temperature),
    MetricSpec::new("OutputAmps", "output_current", "Output Current", Current),
    MetricSpec::new("InvAmps", "inverter_current", "Inverter Current", Current),
    // > 0 from grid, < 0 to grid
    MetricSpec::new("ACInputWatt", "ac_input_power", "AC Input Power", Power),
    MetricSpec::new("ACInputVA", "ac_input_apparent_power", "AC Input Apparent Power", ApparentPower),
    MetricSpec::new("FaultBit", "fault_bit", "Fault Bit", Diagnostic),
    MetricSpec::new("WarningBit", "warning_bit", "Warning Bit", Diagnostic),
    MetricSpec::new("WarningBitHigh", "warning_bit_high", "Warning Bit High", Diagnostic),
    MetricSpec::new("WarningValue", "warning_value", "Warning Value", Diagnostic),
    MetricSpec::new("DeviceTypeCode", "device_type_code", "Device Type Code", Diagnostic),
    MetricSpec::new("ExportToGridTodaykWh", "export_to_grid_today", "Export To Grid Today", Energy),
    MetricSpec::new("ExportToGridTotalkWh", "export_to_grid_total", "Export To Grid Total", Energy),
    MetricSpec::new("PV1EnergyTodaykWh", "pv1_energy_today", "PV1 Energy Today", Energy),
    MetricSpec::new("PV1EnergyTotalkWh", "pv1_energy_total", "PV1 Energy Total", Energy),
    MetricSpec::new("PV2EnergyTodaykWh", "pv2_energy_today", "PV2 Energy Today", Energy),
    MetricSpec::new("PV2EnergyTotalkWh", "pv2_energy_total", "PV2 Energy Total", Energy),
    MetricSpec::new("ACChargeEnergyTodaykWh", "ac_charge_energy_today", "AC Charge Energy Today", Energy),
    MetricSpec::new("ACChargeEnergyTotalkWh", "ac_charge_energy_total", "AC Charge Energy Total", Energy),
    MetricSpec::new("BatteryDischargeEnergyTodaykWh", "battery_discharge_energy_today", "Battery Discharge Energy Today", Energy),
    MetricSpec::new("BatteryDischargeEnergyTotalkWh", "battery_discharge_energy_total", "Battery Discharge Energy Total", Energy),
    MetricSpec::new("ACDischargeEnergyTodaykWh", "ac_discharge_energy_today", "AC Discharge Energy Today", Energy),
    MetricSpec::new("ACDischargeEnergyTotalkWh", "ac_discharge_energy_total", "AC Discharge Energy Total", Energy),
    MetricSpec::new("ACChargeBatteryAmps", "ac_charge_battery_current", "AC Charge Battery Current", Current),
    MetricSpec::new("ACDischargeWatt", "ac_discharge_power", "AC Discharge Power", Power),
    MetricSpec::new("ACDischargeVA", "ac_discharge_apparent_power", "AC Discharge Apparent Power", ApparentPower),
    MetricSpec::new("BatteryDischargeWatt", "battery_discharge_power", "Battery Discharge Power", Power),
    MetricSpec::new("BatteryDischargeVA", "battery_discharge_apparent_power", "Battery Discharge Apparent Power", ApparentPower),
    // > 0 discharge, < 0 charge
    MetricSpec::new("BatteryWatt", "battery_power", "Battery Power", Power),
    MetricSpec::new("MpptFanSpeedPercent", "mppt_fan_speed", "MPPT Fan Speed", Percentage),
    MetricSpec::new("InvFanSpeedPercent", "inverter_fan_speed", "Inverter Fan Speed", Percentage),
    MetricSpec::new("TotalChargeAmps", "total_charge_current", "Total Charge Current", Current),
    MetricSpec::new("TotalDischargeAmps", "total_discharge_current", "Total Discharge Current", Current),
    MetricSpec::new("OPDischargeEnergyTodaykWh", "op_discharge_energy_today", "Output Discharge Energy Today", Energy),
    MetricSpec::new("OPDischargeEnergyTotalkWh", "op_discharge_energy_total", "Output Discharge Energy Total", Energy),
    MetricSpec::new("ParaSystemChargeAmps", "parallel_charge_current", "Parallel System Charge Current", Current),
];

/// The one text field published alongside the metrics.
pub const SYSTEM_STATUS_FIELD: &str = "SystemStatus";
pub const SYSTEM_STATUS_ID: &str = "system_status";

/// Entity identifier of the system status text sensor, eg growatt_system_status
pub fn system_status_identifier() -> String {
    format!("{}_{}", IDENTIFIER_PREFIX, SYSTEM_STATUS_ID)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Metric {
    pub identifier: String,
    pub name: &'static str,
    pub value: f64,
    pub unit: &'static str,
    pub category: Category,
}

/// Maps snapshot fields to metrics using a fixed table.
#[derive(Clone, Debug)]
pub struct MetricPublisher {
    table: &'static [MetricSpec],
}

impl Default for MetricPublisher {
    fn default() -> Self {
        Self::new(STATUS_METRICS)
    }
}

impl MetricPublisher {
    pub fn new(table: &'static [MetricSpec]) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &'static [MetricSpec] {
        self.table
    }

    /// Metrics present in this snapshot. Fields that are absent, sentinel or
    /// non-numeric are skipped individually; whatever was published for
    /// them before stays authoritative.
    pub fn publish(&self, snapshot: &StatusSnapshot) -> Vec<Metric> {
        let mut metrics = Vec::with_capacity(self.table.len());
        let mut skipped = 0;

        for spec in self.table {
            match snapshot.number(spec.field) {
                Some(value) => metrics.push(Metric {
                    identifier: spec.identifier(),
                    name: spec.name,
                    value,
                    unit: spec.unit(),
                    category: spec.category,
                }),
                None => {
                    if let Some(raw) = snapshot.get(spec.field) {
                        debug!("skipping {} this cycle: {:?}", spec.field, raw);
                    }
                    skipped += 1;
                }
            }
        }

        trace!("{} metrics from snapshot, {} skipped", metrics.len(), skipped);

        metrics
    }

    /// `SystemStatus` text, when present and not a sentinel.
    pub fn system_status(&self, snapshot: &StatusSnapshot) -> Option<String> {
        match snapshot.get(SYSTEM_STATUS_FIELD) {
            Some(FieldValue::Text(_)) => snapshot.text(SYSTEM_STATUS_FIELD),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn snapshot(body: &str) -> StatusSnapshot {
        StatusSnapshot::from_json(body, chrono::Utc::now()).unwrap()
    }

    #[test]
    fn identifiers_are_unique() {
        let ids: HashSet<String> = STATUS_METRICS.iter().map(|m| m.identifier()).collect();
        assert_eq!(ids.len(), STATUS_METRICS.len());

        let fields: HashSet<&str> = STATUS_METRICS.iter().map(|m| m.field).collect();
        assert_eq!(fields.len(), STATUS_METRICS.len());
    }

    #[test]
    fn maps_fields_with_units() {
        let publisher = MetricPublisher::default();
        let metrics = publisher.publish(&snapshot(r#"{"PV1Volt":231.4,"BatterySOC":87,"InvTempC":41.5}"#));

        assert_eq!(metrics.len(), 3);
        let pv1 = metrics.iter().find(|m| m.identifier == "growatt_pv1_voltage").unwrap();
        assert_eq!(pv1.value, 231.4);
        assert_eq!(pv1.unit, "V");
        assert_eq!(pv1.category, Category::Voltage);

        let temp = metrics.iter().find(|m| m.identifier == "growatt_inverter_temperature").unwrap();
        assert_eq!(temp.unit, "°C");
    }

    #[test]
    fn skips_sentinel_and_non_numeric_fields() {
        let publisher = MetricPublisher::default();
        let metrics = publisher.publish(&snapshot(
            r#"{"PV1Volt":"unavailable","PV2Volt":"n/a","GridVolt":"229.9","BatterySOC":55}"#,
        ));

        let ids: Vec<&str> = metrics.iter().map(|m| m.identifier.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"growatt_grid_voltage"));
        assert!(ids.contains(&"growatt_battery_soc"));
        assert!(!ids.contains(&"growatt_pv1_voltage"));
        assert!(!ids.contains(&"growatt_pv2_voltage"));
    }

    #[test]
    fn system_status_text() {
        let publisher = MetricPublisher::default();
        assert_eq!(
            publisher.system_status(&snapshot(r#"{"SystemStatus":"PV Charging"}"#)),
            Some("PV Charging".to_string())
        );
        assert_eq!(publisher.system_status(&snapshot(r#"{"SystemStatus":"unknown"}"#)), None);
        assert_eq!(publisher.system_status(&snapshot(r#"{}"#)), None);
    }
}
