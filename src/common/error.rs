use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Grants the actuation strategies depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    DrawOverlays,
    WriteSettings,
    Accessibility,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::DrawOverlays => "draw_over_other_apps",
            Permission::WriteSettings => "modify_system_settings",
            Permission::Accessibility => "accessibility_service",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrientationError {
    #[error("permission denied: {0}")]
    PermissionDenied(Permission),
    #[error("actuation failed: {0}")]
    Actuation(String),
    #[error("setting store error: {0}")]
    Store(String),
    #[error("invalid orientation code: {0}")]
    InvalidOrientationCode(i64),
    #[error("invalid display id: {0}")]
    InvalidDisplayId(i64),
    #[error("service not running: {0}")]
    ServiceNotRunning(String),
}

/// Failure reported by a platform collaborator (window manager, settings
/// provider). The actuator maps these onto [`OrientationError::Actuation`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("display {0} is not attached")]
    DisplayGone(u32),
    #[error("unknown overlay")]
    UnknownOverlay,
    #[error("{0}")]
    Other(String),
}

impl From<PlatformError> for OrientationError {
    fn from(err: PlatformError) -> Self { OrientationError::Actuation(err.to_string()) }
}

impl From<ron::Error> for OrientationError {
    fn from(err: ron::Error) -> Self { OrientationError::Store(err.to_string()) }
}

impl From<ron::error::SpannedError> for OrientationError {
    fn from(err: ron::error::SpannedError) -> Self { OrientationError::Store(err.to_string()) }
}

impl From<std::io::Error> for OrientationError {
    fn from(err: std::io::Error) -> Self { OrientationError::Store(err.to_string()) }
}

pub type Result<T, E = OrientationError> = std::result::Result<T, E>;
