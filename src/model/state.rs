use serde::Serialize;
use tracing::warn;

use crate::common::collections::BTreeMap;
use crate::model::orientation::Orientation;
use crate::model::setting::AppOrientationSetting;
use crate::model::store::{Preferences, SettingStore};
use crate::sys::platform::{ForegroundApps, Permissions, Platform};

/// Snapshot consumed by presentation layers (`status`, tiles).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrientationState {
    pub global_orientation: Orientation,
    pub current_app: Option<String>,
    /// One representative setting per package: the all-screens one when
    /// present, otherwise the one with the lowest display id.
    pub per_app_settings: BTreeMap<String, AppOrientationSetting>,
    pub can_draw_overlays: bool,
    pub accessibility_enabled: bool,
}

impl OrientationState {
    pub fn observe(
        store: &dyn SettingStore,
        prefs: &dyn Preferences,
        platform: &dyn Platform,
    ) -> OrientationState {
        let settings = store.all().unwrap_or_else(|e| {
            warn!("could not read settings: {e}");
            Vec::new()
        });
        let mut per_app_settings: BTreeMap<String, AppOrientationSetting> = BTreeMap::new();
        for setting in settings {
            match per_app_settings.get(&setting.package_name) {
                Some(existing) if !Self::preferred(&setting, existing) => {}
                _ => {
                    per_app_settings.insert(setting.package_name.clone(), setting);
                }
            }
        }
        OrientationState {
            global_orientation: prefs.global_orientation(),
            current_app: platform.foreground_package(),
            per_app_settings,
            can_draw_overlays: platform.can_draw_overlays(),
            accessibility_enabled: platform.accessibility_enabled(),
        }
    }

    // All-screens (-1) sorts first, then ascending display id.
    fn preferred(candidate: &AppOrientationSetting, existing: &AppOrientationSetting) -> bool {
        candidate.display_raw_id() < existing.display_raw_id()
    }

    pub fn orientation_for(&self, package_name: &str) -> Option<Orientation> {
        self.per_app_settings.get(package_name).map(|s| s.orientation)
    }
}
