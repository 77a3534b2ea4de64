//! Reacts to foreground-app changes by resolving and actuating the app's
//! orientation.
//!
//! Switching away from an app that had a per-display lock first resets every
//! attached display, so the lock cannot leak into the next app.

use std::sync::Arc;

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, error, info, instrument, trace, warn};

use crate::actor;
use crate::actor::actuator::Actuate;
use crate::common::config::Settings;
use crate::common::error::{OrientationError, Result};
use crate::model::orientation::{ActuationTarget, DisplayId, Orientation};
use crate::model::resolution::{self, DisplayContext};
use crate::model::store::SettingStore;
use crate::sys::platform::{DisplayProvider, Notice, Notifier, Platform};

#[derive(Debug, Clone)]
pub enum Event {
    /// The accessibility layer saw a window of `package_name` come forward.
    WindowStateChanged(String),
    DisplaysChanged,
    ConfigUpdated(Settings),
}

pub type Sender = actor::Sender<Event>;
pub type Receiver = actor::Receiver<Event>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WatcherState {
    #[default]
    Idle,
    Tracking {
        current: String,
        previous: Option<String>,
    },
}

impl WatcherState {
    pub fn current(&self) -> Option<&str> {
        match self {
            WatcherState::Idle => None,
            WatcherState::Tracking { current, .. } => Some(current),
        }
    }

    pub fn previous(&self) -> Option<&str> {
        match self {
            WatcherState::Idle => None,
            WatcherState::Tracking { previous, .. } => previous.as_deref(),
        }
    }
}

pub struct ForegroundWatcher<A> {
    state: WatcherState,
    store: Arc<dyn SettingStore>,
    platform: Arc<dyn Platform>,
    actuator: A,
    ignored: Vec<Regex>,
    aspect_ratio_threshold: f64,
    permission_noticed: bool,
}

fn compile_ignored(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = %p, "ignoring invalid package pattern: {e}");
                None
            }
        })
        .collect()
}

impl<A: Actuate> ForegroundWatcher<A> {
    pub fn new(
        settings: &Settings,
        store: Arc<dyn SettingStore>,
        platform: Arc<dyn Platform>,
        actuator: A,
    ) -> Self {
        Self {
            state: WatcherState::Idle,
            store,
            platform,
            actuator,
            ignored: compile_ignored(&settings.ignored_packages),
            aspect_ratio_threshold: settings.aspect_ratio_threshold,
            permission_noticed: false,
        }
    }

    pub fn state(&self) -> &WatcherState { &self.state }

    pub async fn run(mut self, mut events: Receiver, cancel: CancellationToken) {
        info!("watcher started");
        loop {
            let (span, event) = tokio::select! {
                _ = cancel.cancelled() => break,
                next = events.recv() => match next {
                    Some(next) => next,
                    None => break,
                },
            };
            self.handle_event(span, event).await;
        }
        info!("watcher stopped");
    }

    #[instrument(skip_all, parent = &span, fields(?event))]
    async fn handle_event(&mut self, span: Span, event: Event) {
        match event {
            Event::WindowStateChanged(package_name) => self.handle_switch(&package_name).await,
            Event::DisplaysChanged => self.actuator.prune().await,
            Event::ConfigUpdated(settings) => self.update_settings(&settings),
        }
    }

    pub fn update_settings(&mut self, settings: &Settings) {
        self.ignored = compile_ignored(&settings.ignored_packages);
        self.aspect_ratio_threshold = settings.aspect_ratio_threshold;
        debug!(ignored = self.ignored.len(), "watcher settings updated");
    }

    fn is_ignored(&self, package_name: &str) -> bool {
        package_name.is_empty() || self.ignored.iter().any(|re| re.is_match(package_name))
    }

    pub async fn handle_switch(&mut self, package_name: &str) {
        if self.is_ignored(package_name) {
            trace!(package_name, "ignored package");
            return;
        }
        if self.state.current() == Some(package_name) {
            return;
        }

        let outgoing = self.state.current().map(str::to_owned);
        if let Some(outgoing) = &outgoing
            && self.has_display_specific_setting(outgoing)
        {
            self.reset_available_displays(outgoing).await;
        }

        self.state = WatcherState::Tracking {
            current: package_name.to_string(),
            previous: outgoing,
        };
        debug!(package_name, "tracking");

        if let Err(e) = self.apply_for(package_name).await {
            self.report(package_name, e);
        }
    }

    fn has_display_specific_setting(&self, package_name: &str) -> bool {
        match self.store.for_package(package_name) {
            Ok(settings) => settings.iter().any(|s| !s.target_screen.is_all_screens()),
            Err(e) => {
                warn!(package_name, "could not read settings: {e}");
                false
            }
        }
    }

    async fn reset_available_displays(&mut self, package_name: &str) {
        debug!(package_name, "resetting per-display lock");
        for display in self.platform.available_ids() {
            let result = self.actuator.reset(ActuationTarget::Display(display)).await;
            self.record_outcome(package_name, result);
        }
    }

    async fn apply_for(&mut self, package_name: &str) -> Result<()> {
        let Some(primary) = self.platform.primary_display() else {
            warn!("no display attached, nothing to apply");
            return Ok(());
        };
        let available: Vec<DisplayId> = self.platform.available_ids();
        let ctx = DisplayContext {
            current_display: primary.id,
            current_aspect: primary.aspect_ratio(self.aspect_ratio_threshold),
            available: &available,
        };
        let Some(setting) = resolution::resolve(self.store.as_ref(), package_name, ctx)? else {
            trace!(package_name, "no applicable setting");
            return Ok(());
        };
        if !setting.enabled {
            debug!(package_name, "setting disabled");
            return Ok(());
        }
        let target = ActuationTarget::from(&setting.target_screen);
        info!(package_name, orientation = %setting.orientation, ?target, "applying");
        let result = self.actuator.apply(setting.orientation, target).await;
        self.record_outcome(package_name, result);
        Ok(())
    }

    fn record_outcome(&mut self, package_name: &str, result: Result<()>) {
        match result {
            Ok(()) => self.permission_noticed = false,
            Err(e) => self.report(package_name, e),
        }
    }

    fn report(&mut self, package_name: &str, err: OrientationError) {
        match err {
            OrientationError::PermissionDenied(permission) => {
                warn!(package_name, %permission, "permission missing");
                if !self.permission_noticed {
                    self.platform.notice(Notice::PermissionRequired(permission));
                    self.permission_noticed = true;
                }
            }
            OrientationError::ServiceNotRunning(_) => error!(package_name, "{err}"),
            err => warn!(package_name, "app switch failed: {err}"),
        }
    }
}

/// Convenience used by the CLI for one-shot resolution without a watcher.
pub fn effective_orientation(
    store: &dyn SettingStore,
    platform: &dyn Platform,
    package_name: &str,
    threshold: f64,
) -> Result<Option<(Orientation, ActuationTarget)>> {
    let Some(primary) = platform.primary_display() else {
        return Ok(None);
    };
    let available = platform.available_ids();
    let ctx = DisplayContext {
        current_display: primary.id,
        current_aspect: primary.aspect_ratio(threshold),
        available: &available,
    };
    Ok(resolution::resolve(store, package_name, ctx)?
        .map(|s| (s.orientation, ActuationTarget::from(&s.target_screen))))
}
