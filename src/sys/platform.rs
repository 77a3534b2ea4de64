//! Seams to the host platform. Everything here is best-effort: a missing
//! answer degrades to a default, it never panics.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::common::error::{Permission, PlatformError};
use crate::model::orientation::{AspectRatio, DisplayId};
use crate::model::setting::InstalledApp;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub id: DisplayId,
    pub name: String,
    pub width_px: u32,
    pub height_px: u32,
    #[serde(default)]
    pub is_primary: bool,
}

impl DisplayInfo {
    pub fn aspect_ratio(&self, threshold: f64) -> AspectRatio {
        AspectRatio::classify(self.width_px, self.height_px, threshold)
    }
}

pub trait DisplayProvider: Send + Sync {
    fn displays(&self) -> Vec<DisplayInfo>;

    fn primary_display(&self) -> Option<DisplayInfo> {
        let displays = self.displays();
        displays
            .iter()
            .find(|d| d.is_primary)
            .or_else(|| displays.iter().min_by_key(|d| d.id))
            .cloned()
    }

    fn available_ids(&self) -> Vec<DisplayId> {
        let mut ids: Vec<DisplayId> = self.displays().into_iter().map(|d| d.id).collect();
        ids.sort();
        ids
    }

    fn display(&self, id: DisplayId) -> Option<DisplayInfo> {
        self.displays().into_iter().find(|d| d.id == id)
    }
}

pub trait ForegroundApps: Send + Sync {
    fn foreground_package(&self) -> Option<String>;
    fn app_label(&self, package_name: &str) -> Option<String>;
    fn recent_apps(&self) -> Vec<InstalledApp>;
}

pub trait Permissions: Send + Sync {
    fn can_draw_overlays(&self) -> bool;
    fn can_write_settings(&self) -> bool;
    fn accessibility_enabled(&self) -> bool;

    fn is_granted(&self, permission: Permission) -> bool {
        match permission {
            Permission::DrawOverlays => self.can_draw_overlays(),
            Permission::WriteSettings => self.can_write_settings(),
            Permission::Accessibility => self.accessibility_enabled(),
        }
    }
}

/// Keys of the machine-wide rotation settings.
pub mod setting_keys {
    pub const ACCELEROMETER_ROTATION: &str = "accelerometer_rotation";
    pub const USER_ROTATION: &str = "user_rotation";
}

pub trait SystemSettings: Send + Sync {
    fn put_int(&self, key: &str, value: i32) -> Result<(), PlatformError>;
    fn get_int(&self, key: &str) -> Option<i32>;
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OverlayFlags: u32 {
        const NOT_FOCUSABLE = 1 << 3;
        const NOT_TOUCHABLE = 1 << 4;
        const LAYOUT_NO_LIMITS = 1 << 9;
    }
}

impl OverlayFlags {
    /// Flags carried by every orientation overlay: invisible to input and
    /// allowed outside the visible frame.
    pub fn orientation_lock() -> Self {
        OverlayFlags::NOT_FOCUSABLE | OverlayFlags::NOT_TOUCHABLE | OverlayFlags::LAYOUT_NO_LIMITS
    }
}

/// A minimal always-on-top window whose only purpose is to carry a fixed
/// `screenOrientation` value on one display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlaySpec {
    pub display: DisplayId,
    pub width: u32,
    pub height: u32,
    pub screen_orientation: i32,
    pub flags: OverlayFlags,
}

slotmap::new_key_type! {
    pub struct OverlayId;
}

pub trait OverlayHost: Send + Sync {
    fn add_overlay(&self, spec: &OverlaySpec) -> Result<OverlayId, PlatformError>;
    fn remove_overlay(&self, overlay: OverlayId) -> Result<(), PlatformError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    PermissionRequired(Permission),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::PermissionRequired(p) => write!(f, "Grant the {p} permission to lock rotation"),
        }
    }
}

/// Transient, one-shot user-visible messages.
pub trait Notifier: Send + Sync {
    fn notice(&self, notice: Notice);
}

pub trait Platform:
    DisplayProvider + ForegroundApps + Permissions + SystemSettings + OverlayHost + Notifier
{
}

impl<T> Platform for T where
    T: DisplayProvider + ForegroundApps + Permissions + SystemSettings + OverlayHost + Notifier
{
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    struct Fixed(Vec<DisplayInfo>);

    impl DisplayProvider for Fixed {
        fn displays(&self) -> Vec<DisplayInfo> { self.0.clone() }
    }

    fn display(id: u32, primary: bool) -> DisplayInfo {
        DisplayInfo {
            id: DisplayId::new(id),
            name: format!("d{id}"),
            width_px: 1080,
            height_px: 2400,
            is_primary: primary,
        }
    }

    #[test]
    fn primary_display_prefers_flag_then_lowest_id() {
        let flagged = Fixed(vec![display(4, false), display(2, true)]);
        assert_eq!(flagged.primary_display().map(|d| d.id), Some(DisplayId::new(2)));

        let unflagged = Fixed(vec![display(4, false), display(3, false)]);
        assert_eq!(unflagged.primary_display().map(|d| d.id), Some(DisplayId::new(3)));

        assert!(Fixed(vec![]).primary_display().is_none());
    }

    #[test]
    fn available_ids_are_sorted() {
        let p = Fixed(vec![display(4, false), display(0, true), display(2, false)]);
        assert_eq!(
            p.available_ids(),
            vec![DisplayId::new(0), DisplayId::new(2), DisplayId::new(4)]
        );
    }

    #[test]
    fn lock_flags_make_the_overlay_inert() {
        let flags = OverlayFlags::orientation_lock();
        assert!(flags.contains(OverlayFlags::NOT_FOCUSABLE | OverlayFlags::NOT_TOUCHABLE));
    }
}
