//! Keeps an [`OrientationState`] snapshot current and publishes it on a
//! `watch` channel.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::model::state::OrientationState;
use crate::model::store::{Preferences, SettingStore, StoreChange};
use crate::sys::platform::Platform;

pub struct StateObserver {
    store: Arc<dyn SettingStore>,
    prefs: Arc<dyn Preferences>,
    platform: Arc<dyn Platform>,
    tx: watch::Sender<OrientationState>,
    changes: Option<broadcast::Receiver<StoreChange>>,
}

impl StateObserver {
    pub fn new(
        store: Arc<dyn SettingStore>,
        prefs: Arc<dyn Preferences>,
        platform: Arc<dyn Platform>,
    ) -> (Self, watch::Receiver<OrientationState>) {
        // Subscribe before the first snapshot so no change falls in between.
        let changes = Some(store.subscribe());
        let initial = OrientationState::observe(store.as_ref(), prefs.as_ref(), platform.as_ref());
        let (tx, rx) = watch::channel(initial);
        (Self { store, prefs, platform, tx, changes }, rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<OrientationState> { self.tx.subscribe() }

    /// Rebuilds the snapshot; subscribers are only woken if it changed.
    pub fn refresh(&self) {
        let next =
            OrientationState::observe(self.store.as_ref(), self.prefs.as_ref(), self.platform.as_ref());
        let changed = self.tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
        trace!(changed, "state refreshed");
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let receiver = self.changes.take().unwrap_or_else(|| self.store.subscribe());
        let mut changes = BroadcastStream::new(receiver);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                change = changes.next() => match change {
                    // A lagged receiver still means something changed.
                    Some(change) => {
                        debug!(?change, "store changed");
                        self.refresh();
                    }
                    None => break,
                },
            }
        }
    }
}
