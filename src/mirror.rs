use crate::controls::Controls;
use crate::prelude::*;

/// Pulls the device's reported settings into the control values.
///
/// Updates made here go straight into the control (origin device) and never
/// through the command writer, so reading a setting can't cause a write of
/// that same setting back to the inverter.
#[derive(Clone, Debug, Default)]
pub struct SettingMirror;

impl SettingMirror {
    pub fn new() -> Self {
        Self
    }

    /// Returns the settings that actually changed.
    pub fn reconcile(&self, snapshot: &StatusSnapshot, controls: &mut Controls) -> Vec<Setting> {
        let mut updated = Vec::new();

        for kind in ControlKind::ALL {
            let Some(raw) = snapshot.get(kind.key()) else {
                continue;
            };

            if raw.is_sentinel() {
                trace!("{} is {}, leaving control alone", kind.key(), raw);
                continue;
            }

            let Some(setting) = kind.parse_device(raw) else {
                warn!("ignoring unexpected {} value from inverter: {}", kind.key(), raw);
                continue;
            };

            let control = controls.get_mut(kind);
            if control.is_pending() {
                debug!(
                    "{} write in flight, not mirroring device value {}",
                    kind.key(),
                    setting.value()
                );
                continue;
            }

            if control.apply_device(setting) {
                info!("{} changed on device: {}", kind.name(), setting.value());
                updated.push(setting);
            }
        }

        updated
    }
}
