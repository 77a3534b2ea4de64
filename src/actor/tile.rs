//! Quick-settings tiles: each one cycles through a fixed list of orientations
//! on every tap.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::actor::actuator::Actuate;
use crate::common::config::TileSettings;
use crate::common::error::{OrientationError, Result};
use crate::model::orientation::{ActuationTarget, AspectRatio, Orientation, TargetScreen};
use crate::model::setting::AppOrientationSetting;
use crate::model::store::{Preferences, SettingStore};
use crate::sys::platform::{
    DisplayInfo, DisplayProvider, ForegroundApps, Notice, Notifier, Platform,
};

const REDUCED: [Orientation; 4] = [
    Orientation::Unspecified,
    Orientation::Portrait,
    Orientation::Landscape,
    Orientation::Sensor,
];

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CycleVariant {
    Full,
    Reduced,
}

impl CycleVariant {
    pub fn orientations(self) -> &'static [Orientation] {
        match self {
            CycleVariant::Full => &Orientation::CYCLE,
            CycleVariant::Reduced => &REDUCED,
        }
    }

    /// The value after `current`. Values outside the cycle restart at its
    /// first element.
    pub fn next_after(self, current: Orientation) -> Orientation {
        let cycle = self.orientations();
        match cycle.iter().position(|o| *o == current) {
            Some(i) => cycle[(i + 1) % cycle.len()],
            None => cycle[0],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TileKind {
    /// Machine-wide preference applied to every display.
    Global,
    /// Per-display setting of whatever app is in the foreground.
    CurrentApp,
    /// Global preference with the short cycle.
    Legacy,
}

impl TileKind {
    pub fn cycle(self, tiles: &TileSettings) -> CycleVariant {
        match self {
            TileKind::Global => tiles.global,
            TileKind::CurrentApp => tiles.current_app,
            TileKind::Legacy => tiles.legacy,
        }
    }

    fn title(self) -> &'static str {
        match self {
            TileKind::Global | TileKind::Legacy => "Rotation",
            TileKind::CurrentApp => "App rotation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileActivity {
    Active,
    Inactive,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileState {
    pub label: String,
    pub subtitle: Option<String>,
    pub activity: TileActivity,
}

impl TileState {
    fn showing(orientation: Orientation, subtitle: Option<String>) -> Self {
        TileState {
            label: orientation.display_name().to_string(),
            subtitle,
            activity: if orientation.is_free_rotation() {
                TileActivity::Inactive
            } else {
                TileActivity::Active
            },
        }
    }

    fn unavailable(label: impl Into<String>) -> Self {
        TileState {
            label: label.into(),
            subtitle: None,
            activity: TileActivity::Unavailable,
        }
    }
}

/// The foreground app and the display a per-app tile acts on.
struct AppTarget {
    package_name: String,
    app_name: String,
    display: DisplayInfo,
}

pub struct TileMachine<A> {
    kind: TileKind,
    cycle: CycleVariant,
    current: Orientation,
    state: TileState,
    store: Arc<dyn SettingStore>,
    prefs: Arc<dyn Preferences>,
    platform: Arc<dyn Platform>,
    actuator: A,
    aspect_ratio_threshold: f64,
}

impl<A: Actuate> TileMachine<A> {
    pub fn new(
        kind: TileKind,
        cycle: CycleVariant,
        store: Arc<dyn SettingStore>,
        prefs: Arc<dyn Preferences>,
        platform: Arc<dyn Platform>,
        actuator: A,
    ) -> Self {
        Self {
            kind,
            cycle,
            current: Orientation::Unspecified,
            state: TileState::unavailable(kind.title()),
            store,
            prefs,
            platform,
            actuator,
            aspect_ratio_threshold: AspectRatio::DEFAULT_THRESHOLD,
        }
    }

    pub fn with_aspect_ratio_threshold(mut self, threshold: f64) -> Self {
        self.aspect_ratio_threshold = threshold;
        self
    }

    pub fn current(&self) -> Orientation { self.current }

    pub fn state(&self) -> &TileState { &self.state }

    /// Re-reads the stored value and shows it. Never writes anything.
    pub fn on_activate(&mut self) -> &TileState {
        match self.kind {
            TileKind::Global | TileKind::Legacy => {
                self.current = self.prefs.global_orientation();
                self.state = TileState::showing(self.current, None);
            }
            TileKind::CurrentApp => match self.app_target() {
                Some(target) => {
                    self.current = self.stored_app_orientation(&target);
                    self.state = TileState::showing(self.current, Some(target.app_name));
                }
                None => self.state = TileState::unavailable("No app"),
            },
        }
        debug!(kind = ?self.kind, current = %self.current, "tile activated");
        &self.state
    }

    pub async fn on_click(&mut self) -> &TileState {
        let next = self.cycle.next_after(self.current);
        let (target, subtitle) = match self.persist(next) {
            Ok(Some(persisted)) => persisted,
            Ok(None) => {
                self.state = TileState::unavailable("No app");
                return &self.state;
            }
            Err(e) => {
                warn!(kind = ?self.kind, "could not store {next}: {e}");
                return &self.state;
            }
        };
        self.current = next;
        self.state = TileState::showing(next, subtitle);

        match self.actuator.apply(next, target).await {
            Ok(()) => info!(kind = ?self.kind, orientation = %next, "tile cycled"),
            Err(OrientationError::PermissionDenied(permission)) => {
                self.state = TileState {
                    label: "Grant permission".to_string(),
                    subtitle: Some(permission.to_string()),
                    activity: TileActivity::Unavailable,
                };
                self.platform.notice(Notice::PermissionRequired(permission));
            }
            Err(e) => warn!(kind = ?self.kind, orientation = %next, "actuation failed: {e}"),
        }
        &self.state
    }

    /// Stores `next` and returns where it should be enforced, or `None` when a
    /// per-app tile has no foreground app to act on.
    fn persist(&self, next: Orientation) -> Result<Option<(ActuationTarget, Option<String>)>> {
        match self.kind {
            TileKind::Global | TileKind::Legacy => {
                self.prefs.set_global_orientation(next)?;
                Ok(Some((ActuationTarget::All, None)))
            }
            TileKind::CurrentApp => {
                let Some(target) = self.app_target() else {
                    return Ok(None);
                };
                let display = target.display.id;
                self.store.upsert(AppOrientationSetting::new(
                    target.package_name,
                    target.app_name.clone(),
                    next,
                    TargetScreen::SpecificScreen {
                        id: display,
                        name: target.display.name.clone(),
                        aspect_ratio: target.display.aspect_ratio(self.aspect_ratio_threshold),
                    },
                ))?;
                Ok(Some((ActuationTarget::Display(display), Some(target.app_name))))
            }
        }
    }

    fn app_target(&self) -> Option<AppTarget> {
        let package_name = self.platform.foreground_package()?;
        let display = self.platform.primary_display()?;
        let app_name = self.platform.app_label(&package_name).unwrap_or_else(|| package_name.clone());
        Some(AppTarget { package_name, app_name, display })
    }

    fn stored_app_orientation(&self, target: &AppTarget) -> Orientation {
        match self.store.get(&target.package_name, target.display.id.get() as i64) {
            Ok(setting) => setting.map(|s| s.orientation).unwrap_or_default(),
            Err(e) => {
                warn!(package_name = %target.package_name, "unreadable setting: {e}");
                Orientation::Unspecified
            }
        }
    }
}
