use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::collections::{BTreeMap, HashSet};
use crate::actor::tile::CycleVariant;
use crate::model::orientation::{AspectRatio, DisplayId};
use crate::sys::platform::DisplayInfo;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ConfigCommand {
    SetStrategy(ActuationMode),
    SetAspectRatioThreshold(f64),
    SetHotReload(bool),

    /// Generic setter for arbitrary config paths using dot-separated keys.
    /// Example: key = "tiles.global", value = "reduced"
    Set {
        key: String,
        value: Value,
    },

    GetConfig,
    SaveConfig,
    ReloadConfig,
}

pub fn data_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".orient-lock")
}
pub fn default_store_file() -> PathBuf { data_dir().join("settings.ron") }
pub fn config_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("orient-lock")
        .join("config.toml")
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActuationMode {
    #[default]
    Overlay,
    GlobalSettings,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub strategy: ActuationMode,
    #[serde(default = "default_aspect_ratio_threshold")]
    pub aspect_ratio_threshold: f64,
    /// Foreground packages (regexes) the watcher never reacts to.
    #[serde(default)]
    pub ignored_packages: Vec<String>,
    /// Where per-app settings are persisted. Defaults to `~/.orient-lock/settings.ron`.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    #[serde(default = "yes")]
    pub hot_reload: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            strategy: ActuationMode::default(),
            aspect_ratio_threshold: default_aspect_ratio_threshold(),
            ignored_packages: Vec::new(),
            store_path: None,
            hot_reload: true,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if !self.aspect_ratio_threshold.is_finite() || self.aspect_ratio_threshold < 1.0 {
            issues.push(format!(
                "aspect_ratio_threshold must be a finite value >= 1.0 (got {})",
                self.aspect_ratio_threshold
            ));
        }

        for (index, pattern) in self.ignored_packages.iter().enumerate() {
            if pattern.trim().is_empty() {
                issues.push(format!("ignored_packages[{index}] is empty"));
            } else if let Err(e) = regex::Regex::new(pattern) {
                issues.push(format!("ignored_packages[{index}] is not a valid regex: {e}"));
            }
        }

        issues
    }

    pub fn store_path(&self) -> PathBuf {
        self.store_path.clone().unwrap_or_else(default_store_file)
    }
}

/// Orientation cycle used by each quick-settings tile.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TileSettings {
    #[serde(default = "full_cycle")]
    pub global: CycleVariant,
    #[serde(default = "reduced_cycle")]
    pub current_app: CycleVariant,
    #[serde(default = "reduced_cycle")]
    pub legacy: CycleVariant,
}

impl Default for TileSettings {
    fn default() -> Self {
        Self {
            global: full_cycle(),
            current_app: reduced_cycle(),
            legacy: reduced_cycle(),
        }
    }
}

/// Simulated platform used by `orient-lock run` when no real window system is
/// attached.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HeadlessSettings {
    #[serde(default = "default_displays")]
    pub displays: Vec<DisplayInfo>,
    #[serde(default = "yes")]
    pub draw_overlays: bool,
    #[serde(default = "yes")]
    pub write_settings: bool,
    #[serde(default = "yes")]
    pub accessibility: bool,
    /// package name -> human readable label
    #[serde(default)]
    pub app_labels: BTreeMap<String, String>,
}

impl Default for HeadlessSettings {
    fn default() -> Self {
        Self {
            displays: default_displays(),
            draw_overlays: true,
            write_settings: true,
            accessibility: true,
            app_labels: BTreeMap::new(),
        }
    }
}

impl HeadlessSettings {
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let mut seen = HashSet::default();
        for display in &self.displays {
            if !seen.insert(display.id) {
                issues.push(format!("headless.displays: duplicate display id {}", display.id));
            }
            if display.width_px == 0 || display.height_px == 0 {
                issues.push(format!("headless.displays: display {} has a zero dimension", display.id));
            }
        }
        if self.displays.iter().filter(|d| d.is_primary).count() > 1 {
            issues.push("headless.displays: more than one primary display".to_string());
        }
        issues
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub tiles: TileSettings,
    #[serde(default)]
    pub headless: HeadlessSettings,
}

fn yes() -> bool { true }

fn default_aspect_ratio_threshold() -> f64 { AspectRatio::DEFAULT_THRESHOLD }

fn full_cycle() -> CycleVariant { CycleVariant::Full }

fn reduced_cycle() -> CycleVariant { CycleVariant::Reduced }

fn default_displays() -> Vec<DisplayInfo> {
    vec![DisplayInfo {
        id: DisplayId::PRIMARY,
        name: "Built-in screen".to_string(),
        width_px: 1080,
        height_px: 2400,
        is_primary: true,
    }]
}

impl Config {
    pub fn read(path: &Path) -> anyhow::Result<Config> {
        let buf = std::fs::read_to_string(path)?;
        Self::parse(&buf)
    }

    /// The configuration shipped with the binary.
    pub fn shipped() -> Config {
        Self::parse(include_str!("../../orient-lock.default.toml"))
            .expect("shipped default config must parse")
    }

    /// Save the current config to a file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let toml_string = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, toml_string.as_bytes())?;

        Ok(())
    }

    /// Validates the entire configuration and returns a list of issues found.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        issues.extend(self.settings.validate());
        issues.extend(self.headless.validate());
        issues
    }

    pub fn parse(buf: &str) -> anyhow::Result<Config> { Ok(toml::from_str::<Config>(buf)?) }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_shipped_config_parses_and_validates() {
        let cfg = Config::shipped();
        assert!(cfg.validate().is_empty(), "{:?}", cfg.validate());
        assert_eq!(cfg.settings.strategy, ActuationMode::Overlay);
        assert_eq!(cfg.tiles, TileSettings::default());
        assert_eq!(cfg.headless.displays.len(), 1);
        assert_eq!(cfg.settings.ignored_packages, vec!["^com\\.android\\.systemui$".to_string()]);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = Config::parse("").unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.settings.aspect_ratio_threshold, 1.1);
        assert!(cfg.settings.hot_reload);
    }

    #[test]
    fn test_parses_headless_displays() {
        let toml = r#"
            [settings]
            strategy = "global_settings"

            [tiles]
            current_app = "full"

            [[headless.displays]]
            id = 0
            name = "phone"
            width_px = 1080
            height_px = 2400
            is_primary = true

            [[headless.displays]]
            id = 2
            name = "monitor"
            width_px = 2560
            height_px = 1440

            [headless.app_labels]
            "com.maps" = "Maps"
        "#;
        let cfg = Config::parse(toml).unwrap();
        assert_eq!(cfg.settings.strategy, ActuationMode::GlobalSettings);
        assert_eq!(cfg.tiles.current_app, CycleVariant::Full);
        assert_eq!(cfg.tiles.legacy, CycleVariant::Reduced);
        assert_eq!(cfg.headless.displays[1].id, DisplayId::new(2));
        assert!(!cfg.headless.displays[1].is_primary);
        assert_eq!(cfg.headless.app_labels.get("com.maps").map(String::as_str), Some("Maps"));
    }

    #[test]
    fn test_rejects_unknown_fields() {
        assert!(Config::parse("[settings]\nanimate = true\n").is_err());
    }

    #[test]
    fn test_unknown_strategy_lists_the_valid_ones() {
        let err = Config::parse("[settings]\nstrategy = \"rotate\"\n").unwrap_err().to_string();
        assert!(err.contains("unknown variant"), "{err}");
        assert!(err.contains("global_settings"), "{err}");
    }

    #[test]
    fn test_settings_validation_threshold() {
        let mut settings = Settings::default();
        settings.aspect_ratio_threshold = 0.9;
        assert!(settings.validate().iter().any(|i| i.contains("aspect_ratio_threshold")));
        settings.aspect_ratio_threshold = f64::NAN;
        assert!(!settings.validate().is_empty());
    }

    #[test]
    fn test_settings_validation_bad_regex() {
        let mut settings = Settings::default();
        settings.ignored_packages = vec!["com.(".to_string(), " ".to_string()];
        let issues = settings.validate();
        assert_eq!(issues.len(), 2);
        assert!(issues[0].contains("not a valid regex"));
        assert!(issues[1].contains("is empty"));
    }

    #[test]
    fn test_headless_validation_duplicates_and_primaries() {
        let mut headless = HeadlessSettings::default();
        let mut dup = headless.displays[0].clone();
        dup.width_px = 0;
        headless.displays.push(dup);
        let issues = headless.validate();
        assert!(issues.iter().any(|i| i.contains("duplicate display id 0")));
        assert!(issues.iter().any(|i| i.contains("zero dimension")));
        assert!(issues.iter().any(|i| i.contains("more than one primary")));
    }

    #[test]
    fn test_save_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg").join("config.toml");
        let mut cfg = Config::shipped();
        cfg.settings.aspect_ratio_threshold = 1.3;
        cfg.save(&path).unwrap();
        assert_eq!(Config::read(&path).unwrap(), cfg);
    }
}
