pub mod orientation;
pub mod resolution;
pub mod setting;
pub mod state;
pub mod store;

pub use orientation::{ActuationTarget, AspectRatio, DisplayId, Orientation, TargetScreen};
pub use setting::{AppOrientationSetting, InstalledApp, SettingKey};
pub use store::{FileSettingStore, MemorySettingStore, Preferences, SettingStore, StoreChange};
