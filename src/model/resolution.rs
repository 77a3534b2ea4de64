//! Picks the single setting that applies to an app in the current display
//! context.
//!
//! Priority, first match wins:
//! 1. the setting for the app's current display, if that display is attached;
//! 2. a setting for another attached display with the same aspect ratio
//!    (lowest display id first);
//! 3. the app's all-screens setting;
//! 4. nothing, in which case the caller leaves the orientation alone.

use tracing::{trace, warn};

use crate::common::error::Result;
use crate::model::orientation::{AspectRatio, DisplayId};
use crate::model::setting::AppOrientationSetting;
use crate::model::store::SettingStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    AspectRatio,
    AllScreens,
}

/// Runtime context of a resolution.
#[derive(Debug, Clone, Copy)]
pub struct DisplayContext<'a> {
    pub current_display: DisplayId,
    pub current_aspect: AspectRatio,
    pub available: &'a [DisplayId],
}

impl DisplayContext<'_> {
    fn is_available(&self, id: DisplayId) -> bool { self.available.contains(&id) }
}

pub fn resolve_among<'s>(
    settings: &'s [AppOrientationSetting],
    ctx: DisplayContext<'_>,
) -> Option<(&'s AppOrientationSetting, MatchKind)> {
    if ctx.is_available(ctx.current_display)
        && let Some(exact) = settings
            .iter()
            .find(|s| s.target_screen.display_id() == Some(ctx.current_display))
    {
        return Some((exact, MatchKind::Exact));
    }

    let similar = settings
        .iter()
        .filter(|s| match s.target_screen.display_id() {
            Some(id) => {
                ctx.is_available(id) && s.target_screen.aspect_ratio() == Some(ctx.current_aspect)
            }
            None => false,
        })
        .min_by_key(|s| s.target_screen.display_id());
    if let Some(similar) = similar {
        return Some((similar, MatchKind::AspectRatio));
    }

    settings
        .iter()
        .find(|s| s.target_screen.is_all_screens())
        .map(|s| (s, MatchKind::AllScreens))
}

/// Resolves the effective setting for `package_name` from the store.
///
/// Rows that fail to decode count as missing; they are never treated as an
/// `Unspecified` setting.
pub fn resolve(
    store: &dyn SettingStore,
    package_name: &str,
    ctx: DisplayContext<'_>,
) -> Result<Option<AppOrientationSetting>> {
    let settings = store.for_package(package_name)?;
    if settings.is_empty() {
        // Distinguish "nothing stored" from "stored but unreadable" in the logs.
        if let Err(err) = store.get(package_name, ctx.current_display.get() as i64) {
            warn!(package_name, "exact setting unreadable, ignoring: {err}");
        }
        trace!(package_name, "no settings");
        return Ok(None);
    }
    let resolved = resolve_among(&settings, ctx);
    trace!(package_name, kind = ?resolved.map(|(_, k)| k), "resolved");
    Ok(resolved.map(|(s, _)| s.clone()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_log::test;

    use super::*;
    use crate::common::error::OrientationError;
    use crate::model::orientation::{Orientation, TargetScreen};
    use crate::model::setting::SettingRow;
    use crate::model::store::MemorySettingStore;

    const PKG: &str = "com.example.app";

    fn on_display(id: u32, aspect: AspectRatio, o: Orientation) -> AppOrientationSetting {
        AppOrientationSetting::new(
            PKG,
            "Example",
            o,
            TargetScreen::SpecificScreen {
                id: DisplayId::new(id),
                name: format!("display-{id}"),
                aspect_ratio: aspect,
            },
        )
    }

    fn all_screens(o: Orientation) -> AppOrientationSetting {
        AppOrientationSetting::new(PKG, "Example", o, TargetScreen::AllScreens)
    }

    fn ids(raw: &[u32]) -> Vec<DisplayId> { raw.iter().copied().map(DisplayId::new).collect() }

    fn resolved_id(
        store: &MemorySettingStore,
        current: u32,
        aspect: AspectRatio,
        available: &[DisplayId],
    ) -> Option<i64> {
        let ctx = DisplayContext {
            current_display: DisplayId::new(current),
            current_aspect: aspect,
            available,
        };
        resolve(store, PKG, ctx).unwrap().map(|s| s.display_raw_id())
    }

    #[test]
    fn follows_priority_order_as_settings_are_removed() {
        let store = MemorySettingStore::new();
        store.upsert(on_display(2, AspectRatio::Landscape, Orientation::Landscape)).unwrap();
        store.upsert(on_display(3, AspectRatio::Portrait, Orientation::Portrait)).unwrap();
        store.upsert(all_screens(Orientation::Sensor)).unwrap();
        let available = ids(&[2, 3]);

        assert_eq!(resolved_id(&store, 2, AspectRatio::Portrait, &available), Some(2));

        store.delete(PKG, 2).unwrap();
        assert_eq!(resolved_id(&store, 2, AspectRatio::Portrait, &available), Some(3));

        store.delete(PKG, 3).unwrap();
        assert_eq!(resolved_id(&store, 2, AspectRatio::Portrait, &available), Some(-1));

        store.delete(PKG, -1).unwrap();
        assert_eq!(resolved_id(&store, 2, AspectRatio::Portrait, &available), None);
    }

    #[test]
    fn unavailable_display_is_never_an_exact_match() {
        let settings = vec![
            on_display(5, AspectRatio::Landscape, Orientation::Landscape),
            all_screens(Orientation::Portrait),
        ];
        let available = ids(&[0]);
        let ctx = DisplayContext {
            current_display: DisplayId::new(5),
            current_aspect: AspectRatio::Landscape,
            available: &available,
        };
        let (setting, kind) = resolve_among(&settings, ctx).unwrap();
        assert_eq!(kind, MatchKind::AllScreens);
        assert_eq!(setting.orientation, Orientation::Portrait);
    }

    #[test]
    fn aspect_ratio_fallback_requires_availability() {
        let settings = vec![on_display(7, AspectRatio::Portrait, Orientation::Portrait)];

        let without = ids(&[1]);
        let ctx = DisplayContext {
            current_display: DisplayId::new(1),
            current_aspect: AspectRatio::Portrait,
            available: &without,
        };
        assert!(resolve_among(&settings, ctx).is_none());

        let with = ids(&[1, 7]);
        let ctx = DisplayContext { available: &with, ..ctx };
        assert_eq!(resolve_among(&settings, ctx).map(|(_, k)| k), Some(MatchKind::AspectRatio));
    }

    #[test]
    fn aspect_ratio_fallback_prefers_lowest_display_id() {
        let settings = vec![
            on_display(9, AspectRatio::Landscape, Orientation::ReverseLandscape),
            on_display(4, AspectRatio::Landscape, Orientation::Landscape),
            on_display(6, AspectRatio::Portrait, Orientation::Portrait),
        ];
        let available = ids(&[1, 4, 6, 9]);
        let ctx = DisplayContext {
            current_display: DisplayId::new(1),
            current_aspect: AspectRatio::Landscape,
            available: &available,
        };
        let (setting, _) = resolve_among(&settings, ctx).unwrap();
        assert_eq!(setting.display_raw_id(), 4);
    }

    #[test]
    fn aspect_mismatch_falls_through_to_all_screens() {
        let settings = vec![
            on_display(3, AspectRatio::Square, Orientation::Landscape),
            all_screens(Orientation::Portrait),
        ];
        let available = ids(&[1, 3]);
        let ctx = DisplayContext {
            current_display: DisplayId::new(1),
            current_aspect: AspectRatio::Landscape,
            available: &available,
        };
        assert_eq!(resolve_among(&settings, ctx).map(|(_, k)| k), Some(MatchKind::AllScreens));
    }

    #[test]
    fn corrupt_exact_row_is_treated_as_missing() {
        let store = MemorySettingStore::new();
        let mut row = SettingRow::from(&on_display(0, AspectRatio::Portrait, Orientation::Portrait));
        row.orientation_code = 12;
        store.insert_row(row);
        assert_eq!(
            store.get(PKG, 0),
            Err(OrientationError::InvalidOrientationCode(12))
        );

        let available = ids(&[0]);
        assert_eq!(resolved_id(&store, 0, AspectRatio::Portrait, &available), None);

        store.upsert(all_screens(Orientation::Landscape)).unwrap();
        assert_eq!(resolved_id(&store, 0, AspectRatio::Portrait, &available), Some(-1));
    }

    #[test]
    fn disabled_settings_are_still_resolved() {
        let store = MemorySettingStore::new();
        store.upsert(all_screens(Orientation::Landscape)).unwrap();
        store.set_enabled(PKG, false).unwrap();
        let available = ids(&[0]);
        let ctx = DisplayContext {
            current_display: DisplayId::new(0),
            current_aspect: AspectRatio::Landscape,
            available: &available,
        };
        let setting = resolve(&store, PKG, ctx).unwrap().unwrap();
        assert!(!setting.enabled);
    }
}
