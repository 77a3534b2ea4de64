use std::fmt;
use std::str::FromStr;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum::EnumIter;
use tracing::warn;

use crate::common::error::OrientationError;

/// Screen orientation modes, declared in cycle order. The discriminant is
/// the persisted code.
#[repr(u8)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    IntoPrimitive,
    TryFromPrimitive,
    EnumIter
)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Unspecified = 0,
    Portrait = 1,
    Landscape = 2,
    ReversePortrait = 3,
    ReverseLandscape = 4,
    Sensor = 5,
}

impl Default for Orientation {
    fn default() -> Self { Orientation::Unspecified }
}

impl Orientation {
    pub const CYCLE: [Orientation; 6] = [
        Orientation::Unspecified,
        Orientation::Portrait,
        Orientation::Landscape,
        Orientation::ReversePortrait,
        Orientation::ReverseLandscape,
        Orientation::Sensor,
    ];

    pub fn code(self) -> u8 { self.into() }

    pub fn from_code(code: i64) -> Result<Orientation, OrientationError> {
        u8::try_from(code)
            .ok()
            .and_then(|c| Orientation::try_from_primitive(c).ok())
            .ok_or(OrientationError::InvalidOrientationCode(code))
    }

    /// Lenient decoder for presentation only; never use it to decide whether a
    /// setting exists.
    pub fn from_code_or_default(code: i64) -> Orientation {
        Self::from_code(code).unwrap_or_else(|err| {
            warn!("{err}; showing {:?} instead", Orientation::Unspecified);
            Orientation::Unspecified
        })
    }

    /// Value of the platform `screenOrientation` window attribute.
    pub fn platform_code(self) -> i32 {
        match self {
            Orientation::Unspecified => -1,
            Orientation::Landscape => 0,
            Orientation::Portrait => 1,
            Orientation::Sensor => 4,
            Orientation::ReverseLandscape => 8,
            Orientation::ReversePortrait => 9,
        }
    }

    /// Fixed rotation written to the `user_rotation` system setting, or `None`
    /// when the mode leaves the sensor in charge.
    pub fn user_rotation(self) -> Option<i32> {
        match self {
            Orientation::Portrait => Some(0),
            Orientation::Landscape => Some(1),
            Orientation::ReversePortrait => Some(2),
            Orientation::ReverseLandscape => Some(3),
            Orientation::Unspecified | Orientation::Sensor => None,
        }
    }

    pub fn is_free_rotation(self) -> bool {
        matches!(self, Orientation::Unspecified | Orientation::Sensor)
    }

    pub fn next(self) -> Orientation {
        let idx = Self::CYCLE.iter().position(|&o| o == self).unwrap_or(0);
        Self::CYCLE[(idx + 1) % Self::CYCLE.len()]
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Orientation::Unspecified => "Auto",
            Orientation::Portrait => "Portrait",
            Orientation::Landscape => "Landscape",
            Orientation::ReversePortrait => "Reverse Portrait",
            Orientation::ReverseLandscape => "Reverse Landscape",
            Orientation::Sensor => "Sensor",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Orientation::Unspecified => "unspecified",
            Orientation::Portrait => "portrait",
            Orientation::Landscape => "landscape",
            Orientation::ReversePortrait => "reverse_portrait",
            Orientation::ReverseLandscape => "reverse_landscape",
            Orientation::Sensor => "sensor",
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.key()) }
}

impl FromStr for Orientation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        if normalized == "auto" {
            return Ok(Orientation::Unspecified);
        }
        Self::CYCLE
            .iter()
            .copied()
            .find(|o| o.key() == normalized)
            .ok_or_else(|| format!("unknown orientation `{s}`"))
    }
}

/// Shape class of a display, used to match settings across displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectRatio {
    Portrait,
    Landscape,
    Square,
}

impl AspectRatio {
    pub const DEFAULT_THRESHOLD: f64 = 1.1;

    pub fn classify(width: u32, height: u32, threshold: f64) -> AspectRatio {
        if width == 0 || height == 0 {
            return AspectRatio::Square;
        }
        let (w, h) = (width as f64, height as f64);
        if w / h >= threshold {
            AspectRatio::Landscape
        } else if h / w >= threshold {
            AspectRatio::Portrait
        } else {
            AspectRatio::Square
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            AspectRatio::Portrait => "portrait",
            AspectRatio::Landscape => "landscape",
            AspectRatio::Square => "square",
        }
    }

    pub fn from_tag(tag: &str) -> Option<AspectRatio> {
        match tag {
            "portrait" => Some(AspectRatio::Portrait),
            "landscape" => Some(AspectRatio::Landscape),
            "square" => Some(AspectRatio::Square),
            _ => None,
        }
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(&s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("unknown aspect ratio `{s}`"))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct DisplayId(u32);

impl DisplayId {
    pub const PRIMARY: DisplayId = DisplayId(0);

    pub fn new(id: u32) -> DisplayId { DisplayId(id) }

    pub fn get(&self) -> u32 { self.0 }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Which display(s) a setting applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetScreen {
    AllScreens,
    SpecificScreen {
        id: DisplayId,
        name: String,
        aspect_ratio: AspectRatio,
    },
}

impl TargetScreen {
    pub const ALL_SCREENS_ID: i64 = -1;

    pub fn raw_id(&self) -> i64 {
        match self {
            TargetScreen::AllScreens => Self::ALL_SCREENS_ID,
            TargetScreen::SpecificScreen { id, .. } => id.get() as i64,
        }
    }

    pub fn display_id(&self) -> Option<DisplayId> {
        match self {
            TargetScreen::AllScreens => None,
            TargetScreen::SpecificScreen { id, .. } => Some(*id),
        }
    }

    pub fn aspect_ratio(&self) -> Option<AspectRatio> {
        match self {
            TargetScreen::AllScreens => None,
            TargetScreen::SpecificScreen { aspect_ratio, .. } => Some(*aspect_ratio),
        }
    }

    pub fn is_all_screens(&self) -> bool { matches!(self, TargetScreen::AllScreens) }

    pub fn name(&self) -> &str {
        match self {
            TargetScreen::AllScreens => "All screens",
            TargetScreen::SpecificScreen { name, .. } => name,
        }
    }

    pub fn from_raw(
        raw_id: i64,
        name: impl Into<String>,
        aspect_ratio: AspectRatio,
    ) -> Result<TargetScreen, OrientationError> {
        if raw_id == Self::ALL_SCREENS_ID {
            return Ok(TargetScreen::AllScreens);
        }
        let id = u32::try_from(raw_id).map_err(|_| OrientationError::InvalidDisplayId(raw_id))?;
        Ok(TargetScreen::SpecificScreen {
            id: DisplayId::new(id),
            name: name.into(),
            aspect_ratio,
        })
    }
}

/// Where the actuator should apply an orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActuationTarget {
    All,
    Display(DisplayId),
}

impl From<&TargetScreen> for ActuationTarget {
    fn from(screen: &TargetScreen) -> Self {
        match screen.display_id() {
            Some(id) => ActuationTarget::Display(id),
            None => ActuationTarget::All,
        }
    }
}
