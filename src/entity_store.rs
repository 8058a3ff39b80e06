use crate::controls::{ControlValue, Controls};
use crate::metrics::Metric;
use crate::prelude::*;

use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq)]
pub enum EntityValue {
    Number(f64),
    Text(String),
}

impl std::fmt::Display for EntityValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityValue::Number(n) => write!(f, "{}", n),
            EntityValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Current value of every entity we expose, keyed by entity identifier,
/// plus the control values. Owned by the coordinator; nothing else writes
/// to it.
#[derive(Clone, Debug, Default)]
pub struct EntityStore {
    entities: HashMap<String, EntityValue>,
    controls: Controls,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the stored value changed.
    pub fn record_metric(&mut self, metric: &Metric) -> bool {
        self.set(&metric.identifier, EntityValue::Number(metric.value))
    }

    pub fn set_text(&mut self, identifier: &str, text: &str) -> bool {
        self.set(identifier, EntityValue::Text(text.to_string()))
    }

    fn set(&mut self, identifier: &str, value: EntityValue) -> bool {
        match self.entities.insert(identifier.to_string(), value.clone()) {
            Some(old) => old != value,
            None => true,
        }
    }

    pub fn get(&self, identifier: &str) -> Option<&EntityValue> {
        self.entities.get(identifier)
    }

    pub fn number(&self, identifier: &str) -> Option<f64> {
        match self.get(identifier)? {
            EntityValue::Number(n) => Some(*n),
            EntityValue::Text(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn controls(&self) -> &Controls {
        &self.controls
    }

    pub fn controls_mut(&mut self) -> &mut Controls {
        &mut self.controls
    }

    pub fn control(&self, kind: ControlKind) -> &ControlValue {
        self.controls.get(kind)
    }
}
