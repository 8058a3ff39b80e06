use crate::metrics::{system_status_identifier, Category, MetricSpec, IDENTIFIER_PREFIX, STATUS_METRICS, SYSTEM_STATUS_ID};
use crate::prelude::*;

use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
pub struct Device {
    pub name: String,
    pub identifiers: Vec<String>,
    pub manufacturer: String,
    pub model: String,
}

#[derive(Clone, Debug, Serialize)]
struct Availability {
    topic: String,
}

// Entity {{{
#[derive(Clone, Debug, Serialize)]
pub struct Entity {
    name: String,
    object_id: String,
    unique_id: String,
    state_topic: String,
    device: Device,
    availability: Vec<Availability>,

    #[serde(skip_serializing_if = "Option::is_none")]
    command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entity_category: Option<String>,

    // select
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<Vec<String>>,

    // number
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<String>,
} // }}}

/// Builds the Home Assistant discovery messages for one inverter.
pub struct Config {
    namespace: String,
    prefix: String,
    node_id: String,
    device: Device,
}

impl Config {
    pub fn new(inverter: &config::Inverter, mqtt: &config::Mqtt) -> Self {
        let node_id = format!("{}_{}", IDENTIFIER_PREFIX, slugify(inverter.name()));

        Self {
            namespace: mqtt.namespace().to_string(),
            prefix: mqtt.homeassistant().prefix().to_string(),
            device: Device {
                name: format!("Growatt {}", inverter.name()),
                identifiers: vec![node_id.clone()],
                manufacturer: "Growatt".to_string(),
                model: "Off-grid inverter".to_string(),
            },
            node_id,
        }
    }

    pub fn all(&self) -> Result<Vec<mqtt::Message>> {
        let mut r = Vec::new();

        for spec in STATUS_METRICS {
            r.push(self.sensor(spec)?);
        }
        r.push(self.system_status()?);
        r.push(self.unavailable_count()?);

        r.push(self.select(ControlKind::OutputMode, crate::controls::OutputMode::ALL.iter().map(|m| m.as_str()))?);
        r.push(self.select(ControlKind::ChargeMode, crate::controls::ChargeMode::ALL.iter().map(|m| m.as_str()))?);
        r.push(self.charge_current()?);

        Ok(r)
    }

    fn entity(&self, object_id: &str, name: &str, state_topic: String) -> Entity {
        Entity {
            name: name.to_string(),
            object_id: format!("{}_{}", self.node_id, object_id),
            unique_id: format!("{}_{}", self.node_id, object_id),
            state_topic,
            device: self.device.clone(),
            availability: vec![Availability {
                topic: format!("{}/LWT", self.namespace),
            }],
            command_topic: None,
            device_class: None,
            state_class: None,
            unit_of_measurement: None,
            entity_category: None,
            options: None,
            min: None,
            max: None,
            step: None,
            mode: None,
        }
    }

    fn message(&self, component: &str, object_id: &str, entity: &Entity) -> Result<mqtt::Message> {
        Ok(mqtt::Message {
            topic: format!("{}/{}/{}/{}/config", self.prefix, component, self.node_id, object_id),
            retain: true,
            payload: serde_json::to_string(entity)?,
        })
    }

    fn sensor(&self, spec: &MetricSpec) -> Result<mqtt::Message> {
        let mut entity = self.entity(
            spec.id,
            spec.name,
            format!("{}/sensor/{}", self.namespace, spec.identifier()),
        );
        entity.device_class = spec.category.device_class().map(str::to_string);
        entity.state_class = Some(spec.category.state_class().to_string());
        if !spec.unit().is_empty() {
            entity.unit_of_measurement = Some(spec.unit().to_string());
        }
        if spec.category == Category::Diagnostic {
            entity.entity_category = Some("diagnostic".to_string());
        }

        self.message("sensor", spec.id, &entity)
    }

    fn system_status(&self) -> Result<mqtt::Message> {
        let entity = self.entity(
            SYSTEM_STATUS_ID,
            "System Status",
            format!("{}/sensor/{}", self.namespace, system_status_identifier()),
        );
        self.message("sensor", SYSTEM_STATUS_ID, &entity)
    }

    fn unavailable_count(&self) -> Result<mqtt::Message> {
        let mut entity = self.entity(
            "unavailable_count",
            "Unavailable Count",
            format!("{}/diagnostic/unavailable_count", self.namespace),
        );
        entity.state_class = Some("total_increasing".to_string());
        entity.entity_category = Some("diagnostic".to_string());
        self.message("sensor", "unavailable_count", &entity)
    }

    fn control_entity(&self, kind: ControlKind) -> Entity {
        let mut entity = self.entity(
            kind.slug(),
            kind.name(),
            format!("{}/control/{}/state", self.namespace, kind.slug()),
        );
        entity.command_topic = Some(format!("{}/control/{}/set", self.namespace, kind.slug()));
        entity.entity_category = Some("config".to_string());
        entity
    }

    fn select<'a>(&self, kind: ControlKind, options: impl Iterator<Item = &'a str>) -> Result<mqtt::Message> {
        let mut entity = self.control_entity(kind);
        entity.options = Some(options.map(str::to_string).collect());
        self.message("select", kind.slug(), &entity)
    }

    fn charge_current(&self) -> Result<mqtt::Message> {
        use crate::controls::ChargeCurrent;

        let kind = ControlKind::AcChargeCurrent;
        let mut entity = self.control_entity(kind);
        entity.min = Some(ChargeCurrent::MIN as f64);
        entity.max = Some(ChargeCurrent::MAX as f64);
        entity.step = Some(ChargeCurrent::STEP as f64);
        entity.mode = Some("box".to_string());
        entity.unit_of_measurement = Some("A".to_string());
        entity.device_class = Some("current".to_string());
        self.message("number", kind.slug(), &entity)
    }
}

fn slugify(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}
