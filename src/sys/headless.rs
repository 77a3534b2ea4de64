//! In-process platform used when no window system is attached. Displays,
//! grants and app labels come from configuration; overlays and rotation
//! settings are tracked in memory and logged.

use parking_lot::{Mutex, RwLock};
use slotmap::SlotMap;
use tracing::{debug, info, warn};

use crate::common::collections::{BTreeMap, HashMap};
use crate::common::config::HeadlessSettings;
use crate::common::error::{Permission, PlatformError};
use crate::model::orientation::DisplayId;
use crate::model::setting::InstalledApp;
use crate::sys::platform::{
    DisplayInfo, DisplayProvider, ForegroundApps, Notice, Notifier, OverlayHost, OverlayId,
    OverlaySpec, Permissions, SystemSettings,
};

pub struct HeadlessPlatform {
    displays: RwLock<Vec<DisplayInfo>>,
    foreground: RwLock<Option<String>>,
    recent: Mutex<Vec<String>>,
    labels: BTreeMap<String, String>,
    grants: RwLock<Grants>,
    overlays: Mutex<SlotMap<OverlayId, OverlaySpec>>,
    settings: Mutex<HashMap<String, i32>>,
    notices: Mutex<Vec<Notice>>,
}

#[derive(Debug, Clone, Copy)]
struct Grants {
    draw_overlays: bool,
    write_settings: bool,
    accessibility: bool,
}

const MAX_RECENT: usize = 16;

impl HeadlessPlatform {
    pub fn new(settings: &HeadlessSettings) -> Self {
        Self {
            displays: RwLock::new(settings.displays.clone()),
            foreground: RwLock::new(None),
            recent: Mutex::new(Vec::new()),
            labels: settings.app_labels.clone(),
            grants: RwLock::new(Grants {
                draw_overlays: settings.draw_overlays,
                write_settings: settings.write_settings,
                accessibility: settings.accessibility,
            }),
            overlays: Mutex::new(SlotMap::with_key()),
            settings: Mutex::new(HashMap::default()),
            notices: Mutex::new(Vec::new()),
        }
    }

    pub fn set_foreground(&self, package_name: &str) {
        *self.foreground.write() = Some(package_name.to_string());
        let mut recent = self.recent.lock();
        recent.retain(|p| p != package_name);
        recent.insert(0, package_name.to_string());
        recent.truncate(MAX_RECENT);
    }

    /// Replaces the attached displays, as a hotplug would.
    pub fn set_displays(&self, displays: Vec<DisplayInfo>) {
        info!(count = displays.len(), "displays changed");
        *self.displays.write() = displays;
    }

    /// Overlays currently attached, by display.
    pub fn overlays(&self) -> Vec<(DisplayId, i32)> {
        let mut out: Vec<_> =
            self.overlays.lock().values().map(|s| (s.display, s.screen_orientation)).collect();
        out.sort();
        out
    }

    /// Grants or revokes a permission, as the user would in system settings.
    pub fn set_granted(&self, permission: Permission, granted: bool) {
        info!(%permission, granted, "permission changed");
        let mut grants = self.grants.write();
        match permission {
            Permission::DrawOverlays => grants.draw_overlays = granted,
            Permission::WriteSettings => grants.write_settings = granted,
            Permission::Accessibility => grants.accessibility = granted,
        }
    }

    pub fn take_notices(&self) -> Vec<Notice> { std::mem::take(&mut *self.notices.lock()) }
}

impl DisplayProvider for HeadlessPlatform {
    fn displays(&self) -> Vec<DisplayInfo> { self.displays.read().clone() }
}

impl ForegroundApps for HeadlessPlatform {
    fn foreground_package(&self) -> Option<String> { self.foreground.read().clone() }

    fn app_label(&self, package_name: &str) -> Option<String> {
        self.labels.get(package_name).cloned()
    }

    fn recent_apps(&self) -> Vec<InstalledApp> {
        let recent = self.recent.lock().clone();
        let mut apps: Vec<InstalledApp> = recent
            .iter()
            .map(|pkg| InstalledApp {
                package_name: pkg.clone(),
                app_name: self.app_label(pkg).unwrap_or_else(|| pkg.clone()),
                is_recent: true,
                is_installed: self.labels.contains_key(pkg),
            })
            .collect();
        apps.extend(self.labels.iter().filter(|(pkg, _)| !recent.contains(pkg)).map(
            |(pkg, label)| InstalledApp {
                package_name: pkg.clone(),
                app_name: label.clone(),
                is_recent: false,
                is_installed: true,
            },
        ));
        apps
    }
}

impl Permissions for HeadlessPlatform {
    fn can_draw_overlays(&self) -> bool { self.grants.read().draw_overlays }

    fn can_write_settings(&self) -> bool { self.grants.read().write_settings }

    fn accessibility_enabled(&self) -> bool { self.grants.read().accessibility }
}

impl SystemSettings for HeadlessPlatform {
    fn put_int(&self, key: &str, value: i32) -> Result<(), PlatformError> {
        info!(key, value, "system setting written");
        self.settings.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn get_int(&self, key: &str) -> Option<i32> { self.settings.lock().get(key).copied() }
}

impl OverlayHost for HeadlessPlatform {
    fn add_overlay(&self, spec: &OverlaySpec) -> Result<OverlayId, PlatformError> {
        if !self.displays.read().iter().any(|d| d.id == spec.display) {
            return Err(PlatformError::DisplayGone(spec.display.get()));
        }
        let id = self.overlays.lock().insert(spec.clone());
        info!(display = %spec.display, orientation = spec.screen_orientation, "overlay added");
        Ok(id)
    }

    fn remove_overlay(&self, overlay: OverlayId) -> Result<(), PlatformError> {
        let Some(spec) = self.overlays.lock().remove(overlay) else {
            return Err(PlatformError::UnknownOverlay);
        };
        if !self.displays.read().iter().any(|d| d.id == spec.display) {
            warn!(display = %spec.display, "overlay removed from detached display");
            return Err(PlatformError::DisplayGone(spec.display.get()));
        }
        debug!(display = %spec.display, "overlay removed");
        Ok(())
    }
}

impl Notifier for HeadlessPlatform {
    fn notice(&self, notice: Notice) {
        info!("notice: {notice}");
        self.notices.lock().push(notice);
    }
}
