//! The actuator is the only component that touches platform rotation APIs.
//!
//! It owns the per-display overlay map and runs on its own thread; other
//! components reach it through [`Handle`], which awaits the outcome of every
//! request.

use std::sync::Arc;
use std::thread::JoinHandle;

use enum_dispatch::enum_dispatch;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, instrument, trace, warn};

use crate::actor;
use crate::common::collections::HashMap;
use crate::common::config::ActuationMode;
use crate::common::error::{OrientationError, Permission, Result};
use crate::model::orientation::{ActuationTarget, DisplayId, Orientation};
use crate::sys::executor::Executor;
use crate::sys::platform::{
    DisplayProvider, OverlayFlags, OverlayHost, OverlayId, OverlaySpec, Permissions, Platform,
    SystemSettings, setting_keys,
};

#[enum_dispatch]
pub trait ActuationStrategy {
    fn name(&self) -> &'static str;

    /// Strategies that act machine-wide ignore the display argument.
    fn is_display_agnostic(&self) -> bool;

    fn apply_to(&mut self, orientation: Orientation, display: DisplayId) -> Result<()>;

    /// Undo everything this strategy put in place. Safe to call repeatedly.
    fn release_all(&mut self);

    /// Forget state tied to displays that are no longer attached.
    fn prune(&mut self, available: &[DisplayId]);

    fn locked_displays(&self) -> Vec<(DisplayId, Orientation)>;
}

#[enum_dispatch(ActuationStrategy)]
pub enum StrategyKind {
    GlobalSettings(GlobalSettingsStrategy),
    Overlay(OverlayStrategy),
}

impl StrategyKind {
    pub fn new(mode: ActuationMode, platform: Arc<dyn Platform>) -> Self {
        match mode {
            ActuationMode::Overlay => OverlayStrategy::new(platform).into(),
            ActuationMode::GlobalSettings => GlobalSettingsStrategy::new(platform).into(),
        }
    }
}

/// Writes the machine-wide auto-rotate toggle and user rotation.
pub struct GlobalSettingsStrategy {
    platform: Arc<dyn Platform>,
    current: Option<Orientation>,
}

impl GlobalSettingsStrategy {
    pub fn new(platform: Arc<dyn Platform>) -> Self { Self { platform, current: None } }
}

impl ActuationStrategy for GlobalSettingsStrategy {
    fn name(&self) -> &'static str { "global_settings" }

    fn is_display_agnostic(&self) -> bool { true }

    fn apply_to(&mut self, orientation: Orientation, _display: DisplayId) -> Result<()> {
        require(self.platform.as_ref(), Permission::WriteSettings)?;
        let auto_rotate = i32::from(orientation.is_free_rotation());
        self.platform.put_int(setting_keys::ACCELEROMETER_ROTATION, auto_rotate)?;
        if let Some(rotation) = orientation.user_rotation() {
            self.platform.put_int(setting_keys::USER_ROTATION, rotation)?;
        }
        self.current = Some(orientation);
        Ok(())
    }

    fn release_all(&mut self) {
        if self.current.take().is_some_and(|o| !o.is_free_rotation())
            && self.platform.can_write_settings()
            && let Err(e) = self.platform.put_int(setting_keys::ACCELEROMETER_ROTATION, 1)
        {
            warn!("failed to restore auto-rotate: {e}");
        }
    }

    fn prune(&mut self, _available: &[DisplayId]) {}

    fn locked_displays(&self) -> Vec<(DisplayId, Orientation)> {
        match self.current {
            Some(o) if !o.is_free_rotation() => vec![(DisplayId::PRIMARY, o)],
            _ => Vec::new(),
        }
    }
}

fn require(platform: &dyn Platform, permission: Permission) -> Result<()> {
    if platform.is_granted(permission) {
        Ok(())
    } else {
        Err(OrientationError::PermissionDenied(permission))
    }
}

struct Overlay {
    id: OverlayId,
    orientation: Orientation,
}

/// Pins a display's orientation with an invisible 1x1 window carrying a fixed
/// `screenOrientation`. At most one overlay exists per display.
pub struct OverlayStrategy {
    platform: Arc<dyn Platform>,
    overlays: HashMap<DisplayId, Overlay>,
}

impl OverlayStrategy {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self { platform, overlays: HashMap::default() }
    }

    fn remove(&mut self, display_id: DisplayId) {
        // Dropped from the map even if the platform refuses; the view is gone
        // with its display in that case.
        if let Some(overlay) = self.overlays.remove(&display_id)
            && let Err(e) = self.platform.remove_overlay(overlay.id)
        {
            warn!(display = %display_id, "failed to remove overlay: {e}");
        }
    }
}

impl ActuationStrategy for OverlayStrategy {
    fn name(&self) -> &'static str { "overlay" }

    fn is_display_agnostic(&self) -> bool { false }

    fn apply_to(&mut self, orientation: Orientation, display_id: DisplayId) -> Result<()> {
        // Removal needs no grant.
        self.remove(display_id);
        if orientation.is_free_rotation() {
            trace!(display = %display_id, "free rotation, no overlay");
            return Ok(());
        }
        require(self.platform.as_ref(), Permission::DrawOverlays)?;
        let spec = OverlaySpec {
            display: display_id,
            width: 1,
            height: 1,
            screen_orientation: orientation.platform_code(),
            flags: OverlayFlags::orientation_lock(),
        };
        let id = self.platform.add_overlay(&spec)?;
        self.overlays.insert(display_id, Overlay { id, orientation });
        Ok(())
    }

    fn release_all(&mut self) {
        let displays: Vec<DisplayId> = self.overlays.keys().copied().collect();
        for display in displays {
            self.remove(display);
        }
    }

    fn prune(&mut self, available: &[DisplayId]) {
        let gone: Vec<DisplayId> =
            self.overlays.keys().filter(|d| !available.contains(d)).copied().collect();
        for display_id in gone {
            debug!(display = %display_id, "display detached, dropping overlay");
            self.remove(display_id);
        }
    }

    fn locked_displays(&self) -> Vec<(DisplayId, Orientation)> {
        let mut out: Vec<_> = self.overlays.iter().map(|(d, o)| (*d, o.orientation)).collect();
        out.sort_by_key(|(d, _)| *d);
        out
    }
}

/// Applies resolved orientations through the configured strategy.
pub struct OrientationActuator {
    strategy: StrategyKind,
    platform: Arc<dyn Platform>,
}

impl OrientationActuator {
    pub fn new(mode: ActuationMode, platform: Arc<dyn Platform>) -> Self {
        Self {
            strategy: StrategyKind::new(mode, platform.clone()),
            platform,
        }
    }

    pub fn strategy_name(&self) -> &'static str { self.strategy.name() }

    pub fn set_mode(&mut self, mode: ActuationMode) {
        let next = StrategyKind::new(mode, self.platform.clone());
        if next.name() == self.strategy.name() {
            return;
        }
        info!(from = self.strategy.name(), to = next.name(), "switching actuation strategy");
        self.strategy.release_all();
        self.strategy = next;
    }

    pub fn apply(&mut self, orientation: Orientation, target: ActuationTarget) -> Result<()> {
        match target {
            ActuationTarget::All => self.apply_all(orientation),
            ActuationTarget::Display(display) => self.apply_display(orientation, display),
        }
    }

    fn apply_display(&mut self, orientation: Orientation, display: DisplayId) -> Result<()> {
        if !self.strategy.is_display_agnostic()
            && !self.platform.available_ids().contains(&display)
        {
            return Err(OrientationError::InvalidDisplayId(display.get() as i64));
        }
        self.strategy.apply_to(orientation, display)
    }

    /// Applies to every attached display. A failing display does not stop the
    /// others; the first failure is returned.
    pub fn apply_all(&mut self, orientation: Orientation) -> Result<()> {
        if self.strategy.is_display_agnostic() {
            return self.strategy.apply_to(orientation, DisplayId::PRIMARY);
        }
        let mut first_err = None;
        for display_id in self.platform.available_ids() {
            if let Err(e) = self.strategy.apply_to(orientation, display_id) {
                warn!(display = %display_id, %orientation, "apply failed: {e}");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn reset(&mut self, target: ActuationTarget) -> Result<()> {
        self.apply(Orientation::Unspecified, target)
    }

    pub fn reset_all(&mut self) -> Result<()> { self.apply_all(Orientation::Unspecified) }

    pub fn release(&mut self) { self.strategy.release_all() }

    pub fn prune(&mut self) {
        let available = self.platform.available_ids();
        self.strategy.prune(&available);
    }

    pub fn locked_displays(&self) -> Vec<(DisplayId, Orientation)> {
        self.strategy.locked_displays()
    }
}

pub enum Request {
    Apply {
        orientation: Orientation,
        target: ActuationTarget,
        response: oneshot::Sender<Result<()>>,
    },
    Prune,
    SetMode(ActuationMode),
    QueryLocked(oneshot::Sender<Vec<(DisplayId, Orientation)>>),
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Apply { orientation, target, .. } => f
                .debug_struct("Apply")
                .field("orientation", orientation)
                .field("target", target)
                .finish(),
            Request::Prune => f.write_str("Prune"),
            Request::SetMode(mode) => f.debug_tuple("SetMode").field(mode).finish(),
            Request::QueryLocked(_) => f.write_str("QueryLocked"),
        }
    }
}

pub type Sender = actor::Sender<Request>;
pub type Receiver = actor::Receiver<Request>;

/// Issues actuation commands and reports their outcome.
#[allow(async_fn_in_trait)]
pub trait Actuate {
    async fn apply(&self, orientation: Orientation, target: ActuationTarget) -> Result<()>;

    async fn reset(&self, target: ActuationTarget) -> Result<()> {
        self.apply(Orientation::Unspecified, target).await
    }

    /// Drop enforcement for displays that went away.
    async fn prune(&self) {}
}

#[derive(Clone, Debug)]
pub struct Handle {
    tx: Sender,
}

impl Handle {
    pub fn new(tx: Sender) -> Self { Self { tx } }

    pub fn set_mode(&self, mode: ActuationMode) { self.tx.send(Request::SetMode(mode)) }

    pub async fn locked_displays(&self) -> Result<Vec<(DisplayId, Orientation)>> {
        let (response, rx) = oneshot::channel();
        self.tx.try_send(Request::QueryLocked(response)).map_err(|_| not_running())?;
        rx.await.map_err(|_| not_running())
    }
}

fn not_running() -> OrientationError { OrientationError::ServiceNotRunning("actuator".to_string()) }

impl Actuate for Handle {
    async fn apply(&self, orientation: Orientation, target: ActuationTarget) -> Result<()> {
        let (response, rx) = oneshot::channel();
        self.tx
            .try_send(Request::Apply { orientation, target, response })
            .map_err(|_| not_running())?;
        rx.await.map_err(|_| not_running())?
    }

    async fn prune(&self) { self.tx.send(Request::Prune) }
}

pub struct ActuatorActor {
    actuator: OrientationActuator,
    rx: Receiver,
    cancel: CancellationToken,
}

impl ActuatorActor {
    pub fn new(actuator: OrientationActuator, rx: Receiver, cancel: CancellationToken) -> Self {
        Self { actuator, rx, cancel }
    }

    pub fn spawn(
        mode: ActuationMode,
        platform: Arc<dyn Platform>,
        cancel: CancellationToken,
    ) -> (Handle, JoinHandle<()>) {
        let (tx, rx) = actor::channel();
        let thread = Executor::spawn("actuator", move || {
            let actor = ActuatorActor::new(OrientationActuator::new(mode, platform), rx, cancel);
            actor.run()
        });
        (Handle::new(tx), thread)
    }

    pub async fn run(mut self) {
        info!(strategy = self.actuator.strategy_name(), "actuator started");
        loop {
            let (span, request) = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(next) => next,
                    None => break,
                },
            };
            self.handle_request(span, request);
        }
        self.actuator.release();
        info!("actuator stopped");
    }

    #[instrument(skip_all, parent = &span, fields(?request))]
    fn handle_request(&mut self, span: Span, request: Request) {
        match request {
            Request::Apply { orientation, target, response } => {
                let result = self.actuator.apply(orientation, target);
                if let Err(e) = &result {
                    debug!("actuation failed: {e}");
                }
                // The requester may have gone away; the outcome is still logged.
                _ = response.send(result);
            }
            Request::Prune => self.actuator.prune(),
            Request::SetMode(mode) => self.actuator.set_mode(mode),
            Request::QueryLocked(response) => {
                _ = response.send(self.actuator.locked_displays());
            }
        }
    }
}
