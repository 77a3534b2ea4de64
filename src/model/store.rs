//! Persistence of per-app orientation settings and the global preference.
//!
//! Rows are keyed by `(package, display id)`; every write is a whole-record
//! upsert. Stores broadcast a [`StoreChange`] after each mutation that actually
//! changed something, which is what observers use as their refresh tick.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::common::error::{OrientationError, Result};
use crate::model::orientation::Orientation;
use crate::model::setting::{AppOrientationSetting, SettingKey, SettingRow};

const CHANGE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Upserted(SettingKey),
    Deleted(SettingKey),
    PackageDeleted(String),
    EnabledChanged { package_name: String, enabled: bool },
    GlobalOrientationChanged(Orientation),
    /// A write could not be persisted and the store went back to its previous
    /// contents.
    Reverted,
}

pub trait SettingStore: Send + Sync {
    /// Every decodable setting, ordered by key.
    fn all(&self) -> Result<Vec<AppOrientationSetting>>;
    /// All settings of one package, one per display.
    fn for_package(&self, package_name: &str) -> Result<Vec<AppOrientationSetting>>;
    /// Point lookup. A row that exists but cannot be decoded is an error, not
    /// `None`.
    fn get(&self, package_name: &str, display_id: i64) -> Result<Option<AppOrientationSetting>>;
    fn upsert(&self, setting: AppOrientationSetting) -> Result<()>;
    /// Removes every setting of `package_name`; returns how many were removed.
    fn delete_package(&self, package_name: &str) -> Result<usize>;
    fn delete(&self, package_name: &str, display_id: i64) -> Result<bool>;
    /// Flips `enabled` on every setting of the package; returns how many changed.
    fn set_enabled(&self, package_name: &str, enabled: bool) -> Result<usize>;
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

pub trait Preferences: Send + Sync {
    fn global_orientation(&self) -> Orientation;
    fn set_global_orientation(&self, orientation: Orientation) -> Result<()>;
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn decode_lenient(row: &SettingRow) -> Option<AppOrientationSetting> {
    match row.decode() {
        Ok(setting) => Some(setting),
        Err(err) => {
            warn!(package = %row.package_name, display = row.display_id, "skipping row: {err}");
            None
        }
    }
}

struct Snapshot {
    rows: Vec<SettingRow>,
    global: Orientation,
}

/// Thread-safe in-memory store.
#[derive(Clone)]
pub struct MemorySettingStore {
    rows: Arc<DashMap<SettingKey, SettingRow>>,
    global: Arc<RwLock<Orientation>>,
    changes: broadcast::Sender<StoreChange>,
}

static_assertions::assert_impl_all!(MemorySettingStore: Send, Sync);

impl Default for MemorySettingStore {
    fn default() -> Self { Self::new() }
}

impl std::fmt::Debug for MemorySettingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySettingStore").field("rows", &self.rows.len()).finish()
    }
}

impl MemorySettingStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            rows: Arc::new(DashMap::new()),
            global: Arc::new(RwLock::new(Orientation::Unspecified)),
            changes,
        }
    }

    fn with_rows(rows: Vec<SettingRow>, global: Orientation) -> Self {
        let store = Self::new();
        for row in rows {
            store.rows.insert(row.key(), row);
        }
        *store.global.write() = global;
        store
    }

    /// Inserts a raw row as-is. Used to load persisted data.
    pub fn insert_row(&self, row: SettingRow) { self.rows.insert(row.key(), row); }

    pub fn len(&self) -> usize { self.rows.len() }

    pub fn is_empty(&self) -> bool { self.rows.is_empty() }

    fn rows_sorted(&self) -> Vec<SettingRow> {
        let mut rows: Vec<SettingRow> = self.rows.iter().map(|e| e.value().clone()).collect();
        rows.sort_by(|a, b| a.key().cmp(&b.key()));
        rows
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot { rows: self.rows_sorted(), global: *self.global.read() }
    }

    fn restore(&self, snapshot: Snapshot) {
        self.rows.clear();
        for row in snapshot.rows {
            self.rows.insert(row.key(), row);
        }
        *self.global.write() = snapshot.global;
        self.notify(StoreChange::Reverted);
    }

    fn notify(&self, change: StoreChange) {
        // No receivers is not an error.
        _ = self.changes.send(change);
    }
}

impl SettingStore for MemorySettingStore {
    fn all(&self) -> Result<Vec<AppOrientationSetting>> {
        Ok(self.rows_sorted().iter().filter_map(decode_lenient).collect())
    }

    fn for_package(&self, package_name: &str) -> Result<Vec<AppOrientationSetting>> {
        Ok(self
            .rows_sorted()
            .iter()
            .filter(|row| row.package_name == package_name)
            .filter_map(decode_lenient)
            .collect())
    }

    fn get(&self, package_name: &str, display_id: i64) -> Result<Option<AppOrientationSetting>> {
        let key = SettingKey::new(package_name, display_id);
        self.rows.get(&key).map(|row| row.decode()).transpose()
    }

    fn upsert(&self, mut setting: AppOrientationSetting) -> Result<()> {
        if setting.package_name.is_empty() {
            return Err(OrientationError::Store("empty package name".to_string()));
        }
        let key = setting.key();
        match self.rows.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().decode().is_ok_and(|existing| existing.same_content(&setting)) {
                    return Ok(());
                }
                setting.last_modified_ms = now_ms();
                *entry.get_mut() = SettingRow::from(&setting);
            }
            Entry::Vacant(entry) => {
                setting.last_modified_ms = now_ms();
                entry.insert(SettingRow::from(&setting));
            }
        }
        debug!(?key, orientation = %setting.orientation, "setting upserted");
        self.notify(StoreChange::Upserted(key));
        Ok(())
    }

    fn delete_package(&self, package_name: &str) -> Result<usize> {
        let before = self.rows.len();
        self.rows.retain(|key, _| key.package_name != package_name);
        let removed = before.saturating_sub(self.rows.len());
        if removed > 0 {
            self.notify(StoreChange::PackageDeleted(package_name.to_string()));
        }
        Ok(removed)
    }

    fn delete(&self, package_name: &str, display_id: i64) -> Result<bool> {
        let key = SettingKey::new(package_name, display_id);
        let removed = self.rows.remove(&key).is_some();
        if removed {
            self.notify(StoreChange::Deleted(key));
        }
        Ok(removed)
    }

    fn set_enabled(&self, package_name: &str, enabled: bool) -> Result<usize> {
        let stamp = now_ms();
        let mut changed = 0;
        for mut row in self.rows.iter_mut() {
            if row.package_name == package_name && row.enabled != enabled {
                row.enabled = enabled;
                row.last_modified_ms = stamp;
                changed += 1;
            }
        }
        if changed > 0 {
            self.notify(StoreChange::EnabledChanged {
                package_name: package_name.to_string(),
                enabled,
            });
        }
        Ok(changed)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> { self.changes.subscribe() }
}

impl Preferences for MemorySettingStore {
    fn global_orientation(&self) -> Orientation { *self.global.read() }

    fn set_global_orientation(&self, orientation: Orientation) -> Result<()> {
        let mut global = self.global.write();
        if *global != orientation {
            *global = orientation;
            drop(global);
            self.notify(StoreChange::GlobalOrientationChanged(orientation));
        }
        Ok(())
    }
}

const STORE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    global_orientation: Orientation,
    rows: Vec<SettingRow>,
}

/// In-memory store mirrored to a RON file after every mutation.
///
/// A file with a different schema version, or one that cannot be parsed, is
/// discarded on load.
pub struct FileSettingStore {
    path: PathBuf,
    inner: MemorySettingStore,
    write_lock: Mutex<()>,
}

impl FileSettingStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let inner = match Self::load(&path) {
            Ok(Some(file)) => {
                info!(path = %path.display(), rows = file.rows.len(), "loaded settings");
                MemorySettingStore::with_rows(file.rows, file.global_orientation)
            }
            Ok(None) => MemorySettingStore::new(),
            Err(err) => {
                warn!(path = %path.display(), "discarding unreadable settings file: {err}");
                if let Err(err) = fs::remove_file(&path) {
                    warn!("failed to remove {}: {err}", path.display());
                }
                MemorySettingStore::new()
            }
        };
        Ok(Self { path, inner, write_lock: Mutex::new(()) })
    }

    fn load(path: &Path) -> Result<Option<StoreFile>> {
        if !path.exists() {
            return Ok(None);
        }
        let buf = fs::read_to_string(path)?;
        let file: StoreFile = ron::from_str(&buf)?;
        if file.version != STORE_VERSION {
            return Err(OrientationError::Store(format!(
                "schema version {} (expected {STORE_VERSION})",
                file.version
            )));
        }
        Ok(Some(file))
    }

    /// Applies `mutate` to memory and writes the result to disk. A failed write
    /// rolls memory back to its previous contents.
    fn commit<T>(
        &self,
        mutate: impl FnOnce(&MemorySettingStore) -> Result<T>,
        changed: impl FnOnce(&T) -> bool,
    ) -> Result<T> {
        let _guard = self.write_lock.lock();
        let before = self.inner.snapshot();
        let out = mutate(&self.inner)?;
        if !changed(&out) {
            return Ok(out);
        }
        if let Err(err) = self.persist() {
            warn!(path = %self.path.display(), "rolling back unsaved change: {err}");
            self.inner.restore(before);
            return Err(err);
        }
        Ok(out)
    }

    fn persist(&self) -> Result<()> {
        let file = StoreFile {
            version: STORE_VERSION,
            global_orientation: self.inner.global_orientation(),
            rows: self.inner.rows_sorted(),
        };
        let buf = ron::ser::to_string_pretty(&file, ron::ser::PrettyConfig::default())?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("ron.tmp");
        fs::write(&tmp, buf.as_bytes())?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SettingStore for FileSettingStore {
    fn all(&self) -> Result<Vec<AppOrientationSetting>> { self.inner.all() }

    fn for_package(&self, package_name: &str) -> Result<Vec<AppOrientationSetting>> {
        self.inner.for_package(package_name)
    }

    fn get(&self, package_name: &str, display_id: i64) -> Result<Option<AppOrientationSetting>> {
        self.inner.get(package_name, display_id)
    }

    fn upsert(&self, setting: AppOrientationSetting) -> Result<()> {
        self.commit(|inner| inner.upsert(setting), |_| true)
    }

    fn delete_package(&self, package_name: &str) -> Result<usize> {
        self.commit(|inner| inner.delete_package(package_name), |removed| *removed > 0)
    }

    fn delete(&self, package_name: &str, display_id: i64) -> Result<bool> {
        self.commit(|inner| inner.delete(package_name, display_id), |removed| *removed)
    }

    fn set_enabled(&self, package_name: &str, enabled: bool) -> Result<usize> {
        self.commit(|inner| inner.set_enabled(package_name, enabled), |changed| *changed > 0)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> { self.inner.subscribe() }
}

impl Preferences for FileSettingStore {
    fn global_orientation(&self) -> Orientation { self.inner.global_orientation() }

    fn set_global_orientation(&self, orientation: Orientation) -> Result<()> {
        self.commit(|inner| inner.set_global_orientation(orientation), |_| true)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_log::test;

    use super::*;
    use crate::model::orientation::{AspectRatio, DisplayId, TargetScreen};

    fn screen(id: u32) -> TargetScreen {
        TargetScreen::SpecificScreen {
            id: DisplayId::new(id),
            name: format!("display-{id}"),
            aspect_ratio: AspectRatio::Portrait,
        }
    }

    fn setting(pkg: &str, target: TargetScreen, o: Orientation) -> AppOrientationSetting {
        AppOrientationSetting::new(pkg, pkg.to_uppercase(), o, target)
    }

    #[test]
    fn upserting_twice_keeps_one_row() {
        let store = MemorySettingStore::new();
        let s = setting("com.x", screen(1), Orientation::Portrait);
        store.upsert(s.clone()).unwrap();
        store.upsert(s.clone()).unwrap();
        assert_eq!(store.len(), 1);
        let stored = store.get("com.x", 1).unwrap().unwrap();
        assert!(stored.same_content(&s));
    }

    #[test]
    fn identical_upsert_does_not_broadcast() {
        let store = MemorySettingStore::new();
        let mut rx = store.subscribe();
        let s = setting("com.x", screen(1), Orientation::Portrait);
        store.upsert(s.clone()).unwrap();
        store.upsert(s).unwrap();
        assert_eq!(rx.try_recv().unwrap(), StoreChange::Upserted(SettingKey::new("com.x", 1)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn upsert_replaces_by_primary_key() {
        let store = MemorySettingStore::new();
        store.upsert(setting("com.x", screen(1), Orientation::Portrait)).unwrap();
        store.upsert(setting("com.x", screen(1), Orientation::Landscape)).unwrap();
        store.upsert(setting("com.x", TargetScreen::AllScreens, Orientation::Sensor)).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(
            store.get("com.x", 1).unwrap().map(|s| s.orientation),
            Some(Orientation::Landscape)
        );
        let all = store.for_package("com.x").unwrap();
        assert_eq!(all.iter().map(|s| s.display_raw_id()).collect::<Vec<_>>(), vec![-1, 1]);
    }

    #[test]
    fn deletes_by_key_and_by_package() {
        let store = MemorySettingStore::new();
        store.upsert(setting("com.x", screen(1), Orientation::Portrait)).unwrap();
        store.upsert(setting("com.x", screen(2), Orientation::Portrait)).unwrap();
        store.upsert(setting("com.y", screen(2), Orientation::Portrait)).unwrap();

        assert_eq!(store.delete("com.x", 1), Ok(true));
        assert_eq!(store.delete("com.x", 1), Ok(false));
        assert_eq!(store.delete_package("com.x"), Ok(1));
        assert_eq!(store.delete_package("com.x"), Ok(0));
        assert_eq!(store.all().unwrap().len(), 1);
    }

    #[test]
    fn set_enabled_touches_every_display() {
        let store = MemorySettingStore::new();
        store.upsert(setting("com.x", screen(1), Orientation::Portrait)).unwrap();
        store.upsert(setting("com.x", TargetScreen::AllScreens, Orientation::Portrait)).unwrap();
        assert_eq!(store.set_enabled("com.x", false), Ok(2));
        assert_eq!(store.set_enabled("com.x", false), Ok(0));
        assert!(store.for_package("com.x").unwrap().iter().all(|s| !s.enabled));
    }

    #[test]
    fn undecodable_rows_are_skipped_in_listings_but_reported_on_lookup() {
        let store = MemorySettingStore::new();
        let mut row = SettingRow::from(&setting("com.bad", screen(1), Orientation::Portrait));
        row.orientation_code = 99;
        store.insert_row(row);
        store.upsert(setting("com.ok", screen(1), Orientation::Portrait)).unwrap();

        assert_eq!(store.all().unwrap().len(), 1);
        assert!(store.for_package("com.bad").unwrap().is_empty());
        assert_eq!(
            store.get("com.bad", 1),
            Err(OrientationError::InvalidOrientationCode(99))
        );
    }

    #[test]
    fn rejects_empty_package_name() {
        let store = MemorySettingStore::new();
        let err = store.upsert(setting("", screen(0), Orientation::Portrait)).unwrap_err();
        assert!(matches!(err, OrientationError::Store(_)));
    }

    #[test]
    fn global_preference_round_trips() {
        let store = MemorySettingStore::new();
        assert_eq!(store.global_orientation(), Orientation::Unspecified);
        store.set_global_orientation(Orientation::ReversePortrait).unwrap();
        assert_eq!(store.global_orientation(), Orientation::ReversePortrait);
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.ron");
        {
            let store = FileSettingStore::open(&path).unwrap();
            store.upsert(setting("com.x", screen(3), Orientation::Landscape)).unwrap();
            store.upsert(setting("com.y", TargetScreen::AllScreens, Orientation::Sensor)).unwrap();
            store.set_enabled("com.y", false).unwrap();
            store.set_global_orientation(Orientation::Portrait).unwrap();
        }
        let store = FileSettingStore::open(&path).unwrap();
        assert_eq!(store.all().unwrap().len(), 2);
        assert_eq!(store.global_orientation(), Orientation::Portrait);
        let y = store.get("com.y", -1).unwrap().unwrap();
        assert!(!y.enabled);
        assert_eq!(y.orientation, Orientation::Sensor);
    }

    #[test]
    fn file_store_resets_on_version_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.ron");
        fs::write(&path, "(version: 0, global_orientation: portrait, rows: [])").unwrap();
        let store = FileSettingStore::open(&path).unwrap();
        assert!(store.all().unwrap().is_empty());
        assert_eq!(store.global_orientation(), Orientation::Unspecified);
        assert!(!path.exists());
    }

    #[test]
    fn file_store_resets_on_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.ron");
        fs::write(&path, "not ron at all {").unwrap();
        let store = FileSettingStore::open(&path).unwrap();
        assert!(store.all().unwrap().is_empty());
        store.upsert(setting("com.x", screen(0), Orientation::Portrait)).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn failed_write_leaves_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let store = FileSettingStore::open(blocker.join("settings.ron")).unwrap();
        let mut rx = store.subscribe();

        let err = store
            .upsert(setting("com.x", TargetScreen::AllScreens, Orientation::Landscape))
            .unwrap_err();
        assert!(matches!(err, OrientationError::Store(_)));
        assert_eq!(store.get("com.x", -1), Ok(None));
        assert!(store.all().unwrap().is_empty());

        assert!(store.set_global_orientation(Orientation::Portrait).is_err());
        assert_eq!(store.global_orientation(), Orientation::Unspecified);

        let changes: Vec<StoreChange> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(changes.last(), Some(&StoreChange::Reverted));
    }
}
