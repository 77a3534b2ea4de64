use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, thread};

use notify::RecursiveMode;
use notify_debouncer_mini::{
    DebounceEventResult, DebouncedEvent, DebouncedEventKind, new_debouncer,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::actor::config::{self as config_actor, Event as ConfigEvent};
use crate::common::collections::HashSet;
use crate::common::config::{Config, ConfigCommand};
use crate::sys::executor::Executor;

/// Reloads the config file through the config actor whenever it changes on
/// disk, including edits made through a symlink.
pub struct ConfigWatcher {
    file: PathBuf,
    real_file: Option<PathBuf>,
    real_file_id: Option<(u64, u64)>,
    config_tx: config_actor::Sender,
    enabled: bool,
}

impl ConfigWatcher {
    pub fn new(config_tx: config_actor::Sender, config: &Config, config_path: PathBuf) -> Self {
        let real_file = fs::canonicalize(&config_path).ok();
        let real_file_id = real_file
            .as_ref()
            .and_then(|p| fs::metadata(p).ok())
            .map(|m| (m.dev(), m.ino()));
        ConfigWatcher {
            file: config_path,
            real_file,
            real_file_id,
            config_tx,
            enabled: config.settings.hot_reload,
        }
    }

    pub fn spawn(
        config_tx: config_actor::Sender,
        config: &Config,
        config_path: PathBuf,
        cancel: CancellationToken,
    ) -> thread::JoinHandle<()> {
        let actor = ConfigWatcher::new(config_tx, config, config_path);
        Executor::spawn("config-watcher", move || async move {
            if let Err(e) = actor.run(cancel).await {
                warn!("config-watcher: error: {e:?}");
            }
        })
    }

    async fn run(mut self, cancel: CancellationToken) -> notify::Result<()> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<DebouncedEvent>();

        let mut debouncer =
            new_debouncer(Duration::from_millis(250), move |res: DebounceEventResult| {
                if let Ok(events) = res {
                    for e in events {
                        if e.kind == DebouncedEventKind::Any {
                            let _ = tx.send(e);
                        }
                    }
                }
            })?;

        let watcher = debouncer.watcher();
        for dir in self.watched_dirs() {
            watcher.watch(&dir, RecursiveMode::NonRecursive)?;
            info!("watching {:?}", dir);
        }

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if !self.is_relevant(&event.path) {
                continue;
            }
            trace!("change detected (debounced): {:?} {:?}", event.kind, event.path);

            // With hot reload off, only a file that turns it back on is picked up.
            let should_reload = self.enabled
                || match Config::read(&self.file) {
                    Ok(new_cfg) => new_cfg.settings.hot_reload,
                    Err(e) => {
                        warn!("Failed to read config file: {:?}", e);
                        false
                    }
                };

            if should_reload {
                match self.request_reload().await {
                    Ok(()) => {
                        if let Ok(new_config) = self.query_config().await {
                            self.enabled = new_config.settings.hot_reload;
                        }
                        debug!("config reloaded successfully");
                    }
                    Err(e) => warn!("config reload rejected: {e}"),
                }
            }
        }

        Ok(())
    }

    fn watched_dirs(&self) -> HashSet<PathBuf> {
        let mut parents = HashSet::default();
        if let Some(p) = self.file.parent() {
            parents.insert(dir_or_cwd(p));
        }
        if let Some(real) = &self.real_file
            && let Some(p) = real.parent()
        {
            parents.insert(dir_or_cwd(p));
        }
        parents
    }

    fn is_relevant(&self, path: &Path) -> bool {
        if path == self.file {
            return true;
        }

        if let Some(real) = &self.real_file {
            if path == real.as_path() {
                return true;
            }

            if let Ok(ev_real) = fs::canonicalize(path)
                && ev_real == *real
            {
                return true;
            }

            if let Ok(meta) = fs::metadata(path)
                && let Some((dev, ino)) = self.real_file_id
                && meta.dev() == dev
                && meta.ino() == ino
            {
                return true;
            }
        }

        path.file_name().is_some_and(|n| Some(n) == self.file.file_name())
    }

    async fn request_reload(&self) -> Result<(), String> {
        info!("requesting config reload");
        let (tx, fut) = r#continue::continuation();

        let msg = ConfigEvent::ApplyConfig {
            cmd: ConfigCommand::ReloadConfig,
            response: tx,
        };

        if let Err(e) = self.config_tx.try_send(msg) {
            let tokio::sync::mpsc::error::SendError((_span, msg)) = e;
            match msg {
                ConfigEvent::ApplyConfig { response, .. } => std::mem::forget(response),
                ConfigEvent::QueryConfig(response) => std::mem::forget(response),
            }
            return Err("Config actor unavailable".to_string());
        }

        fut.await
    }

    async fn query_config(&self) -> Result<Config, ()> {
        let (tx, fut) = r#continue::continuation();
        let event = ConfigEvent::QueryConfig(tx);
        if let Err(e) = self.config_tx.try_send(event) {
            let tokio::sync::mpsc::error::SendError((_span, event)) = e;
            if let ConfigEvent::QueryConfig(response) = event {
                std::mem::forget(response);
            }
            return Err(());
        }
        Ok(fut.await)
    }
}

fn dir_or_cwd(dir: &Path) -> PathBuf {
    if dir.as_os_str().is_empty() { PathBuf::from(".") } else { dir.to_path_buf() }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::actor;

    #[test]
    fn matches_the_file_and_its_symlink_target() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.toml");
        fs::write(&real, "").unwrap();
        let link = dir.path().join("config.toml");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let (tx, _rx) = actor::channel();
        let watcher = ConfigWatcher::new(tx, &Config::default(), link.clone());

        assert!(watcher.is_relevant(&link));
        assert!(watcher.is_relevant(&real));
        assert!(!watcher.is_relevant(&dir.path().join("other.toml")));
    }

    #[test]
    fn bare_file_name_watches_current_dir() {
        let (tx, _rx) = actor::channel();
        let watcher = ConfigWatcher::new(tx, &Config::default(), PathBuf::from("config.toml"));
        assert!(watcher.watched_dirs().contains(&PathBuf::from(".")));
    }
}
