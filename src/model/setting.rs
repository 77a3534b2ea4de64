use serde::{Deserialize, Serialize};

use crate::common::error::OrientationError;
use crate::model::orientation::{AspectRatio, DisplayId, Orientation, TargetScreen};

/// Primary key of a persisted setting: package plus raw display id (`-1` for
/// all screens).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SettingKey {
    pub package_name: String,
    pub display_id: i64,
}

impl SettingKey {
    pub fn new(package_name: impl Into<String>, display_id: i64) -> Self {
        Self { package_name: package_name.into(), display_id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppOrientationSetting {
    pub package_name: String,
    pub app_name: String,
    pub orientation: Orientation,
    pub target_screen: TargetScreen,
    pub enabled: bool,
    #[serde(default)]
    pub last_modified_ms: u64,
}

impl AppOrientationSetting {
    pub fn new(
        package_name: impl Into<String>,
        app_name: impl Into<String>,
        orientation: Orientation,
        target_screen: TargetScreen,
    ) -> Self {
        Self {
            package_name: package_name.into(),
            app_name: app_name.into(),
            orientation,
            target_screen,
            enabled: true,
            last_modified_ms: 0,
        }
    }

    pub fn key(&self) -> SettingKey {
        SettingKey::new(self.package_name.clone(), self.target_screen.raw_id())
    }

    pub fn display_raw_id(&self) -> i64 { self.target_screen.raw_id() }

    /// Same record apart from the modification stamp.
    pub fn same_content(&self, other: &AppOrientationSetting) -> bool {
        self.package_name == other.package_name
            && self.app_name == other.app_name
            && self.orientation == other.orientation
            && self.target_screen == other.target_screen
            && self.enabled == other.enabled
    }
}

/// Stored form of a setting. Rows keep raw codes so that corrupt data is
/// detected when it is read, not silently coerced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingRow {
    pub package_name: String,
    pub display_id: i64,
    pub app_name: String,
    pub orientation_code: i64,
    pub display_name: String,
    pub aspect_ratio: String,
    pub enabled: bool,
    pub last_modified_ms: u64,
}

impl SettingRow {
    pub fn key(&self) -> SettingKey { SettingKey::new(self.package_name.clone(), self.display_id) }

    pub fn decode(&self) -> Result<AppOrientationSetting, OrientationError> {
        let orientation = Orientation::from_code(self.orientation_code)?;
        // The tag is meaningless for all-screens rows.
        let aspect_ratio = match AspectRatio::from_tag(&self.aspect_ratio) {
            Some(aspect_ratio) => aspect_ratio,
            None if self.display_id == TargetScreen::ALL_SCREENS_ID => AspectRatio::Square,
            None => {
                return Err(OrientationError::Store(format!(
                    "unknown aspect ratio tag `{}`",
                    self.aspect_ratio
                )));
            }
        };
        let target_screen =
            TargetScreen::from_raw(self.display_id, self.display_name.clone(), aspect_ratio)?;
        Ok(AppOrientationSetting {
            package_name: self.package_name.clone(),
            app_name: self.app_name.clone(),
            orientation,
            target_screen,
            enabled: self.enabled,
            last_modified_ms: self.last_modified_ms,
        })
    }
}

impl From<&AppOrientationSetting> for SettingRow {
    fn from(setting: &AppOrientationSetting) -> Self {
        let aspect_ratio = setting.target_screen.aspect_ratio().unwrap_or(AspectRatio::Square);
        SettingRow {
            package_name: setting.package_name.clone(),
            display_id: setting.target_screen.raw_id(),
            app_name: setting.app_name.clone(),
            orientation_code: setting.orientation.code() as i64,
            display_name: setting.target_screen.name().to_string(),
            aspect_ratio: aspect_ratio.tag().to_string(),
            enabled: setting.enabled,
            last_modified_ms: setting.last_modified_ms,
        }
    }
}

/// An app as shown by app pickers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledApp {
    pub package_name: String,
    pub app_name: String,
    pub is_recent: bool,
    pub is_installed: bool,
}
