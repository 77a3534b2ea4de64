use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::actor::{self, actuator, watcher};
use crate::common::config::{Config, ConfigCommand};
use crate::sys::executor::Executor;

pub type Sender = actor::Sender<Event>;
pub type Receiver = actor::Receiver<Event>;

#[derive(Serialize, Deserialize, Debug)]
pub enum Event {
    #[serde(skip)]
    QueryConfig(r#continue::Sender<Config>),
    #[serde(skip)]
    ApplyConfig {
        cmd: ConfigCommand,
        #[serde(skip)]
        response: r#continue::Sender<Result<(), String>>,
    },
}

pub struct ConfigActor {
    config: Config,
    watcher_tx: watcher::Sender,
    actuator: actuator::Handle,
    config_path: PathBuf,
}

impl ConfigActor {
    pub fn new(
        config: Config,
        watcher_tx: watcher::Sender,
        actuator: actuator::Handle,
        config_path: PathBuf,
    ) -> Self {
        Self { config, watcher_tx, actuator, config_path }
    }

    pub fn spawn(
        config: Config,
        watcher_tx: watcher::Sender,
        actuator: actuator::Handle,
        config_path: PathBuf,
    ) -> Sender {
        let (tx, rx) = actor::channel();
        Executor::spawn("config", move || {
            ConfigActor::new(config, watcher_tx, actuator, config_path).run(rx)
        });
        tx
    }

    async fn run(mut self, mut events: Receiver) {
        while let Some((_span, event)) = events.recv().await {
            match event {
                Event::QueryConfig(resp) => resp.send(self.config.clone()),
                Event::ApplyConfig { cmd, response } => {
                    let res = self.handle_config_command(cmd);
                    response.send(res);
                }
            }
        }
    }

    pub fn config(&self) -> &Config { &self.config }

    pub fn handle_config_command(&mut self, cmd: ConfigCommand) -> Result<(), String> {
        debug!("Applying config command: {:?}", cmd);
        let mut new_config = self.config.clone();

        match cmd {
            ConfigCommand::SetStrategy(mode) => {
                new_config.settings.strategy = mode;
                info!("Updated strategy to: {:?}", mode);
            }
            ConfigCommand::SetAspectRatioThreshold(v) => {
                new_config.settings.aspect_ratio_threshold = v;
                info!("Updated aspect_ratio_threshold to: {}", v);
            }
            ConfigCommand::SetHotReload(v) => {
                new_config.settings.hot_reload = v;
                info!("Updated hot_reload to: {}", v);
            }
            ConfigCommand::Set { key, value } => {
                new_config = set_path(&new_config, &key, value.clone())?;
                info!("Updated {} to {}", key, value);
            }
            ConfigCommand::GetConfig => {
                let config_json = serde_json::to_string_pretty(&self.config)
                    .unwrap_or_else(|e| format!("Error serializing config: {}", e));
                info!("Current config:\n{}", config_json);
                return Ok(());
            }
            ConfigCommand::SaveConfig => {
                return match self.config.save(&self.config_path) {
                    Ok(()) => {
                        info!("Config saved successfully");
                        Ok(())
                    }
                    Err(e) => Err(format!("Failed to save config: {}", e)),
                };
            }
            ConfigCommand::ReloadConfig => {
                if !self.config_path.exists() {
                    return Err("Failed to reload config: config file not found".to_string());
                }
                new_config = Config::read(&self.config_path)
                    .map_err(|e| format!("Failed to reload config: {}", e))?;
                info!("Config reloaded successfully");
            }
        }

        let validation_issues = new_config.validate();
        if !validation_issues.is_empty() {
            return Err(validation_issues.join("; "));
        }

        if new_config != self.config {
            self.config = new_config;
            self.actuator.set_mode(self.config.settings.strategy);
            self.watcher_tx.send(watcher::Event::ConfigUpdated(self.config.settings.clone()));
        }

        Ok(())
    }
}

/// Writes `value` at the dot-separated `key` and re-reads the whole config, so
/// the usual field checks apply.
fn set_path(config: &Config, key: &str, value: serde_json::Value) -> Result<Config, String> {
    let mut cfg_val = serde_json::to_value(config)
        .map_err(|e| format!("Failed to serialize config for modification: {}", e))?;
    let parts: Vec<&str> = key.split('.').filter(|p| !p.is_empty()).collect();
    let Some((last, parents)) = parts.split_last() else {
        return Err("Empty config key provided".to_string());
    };

    let mut cur = &mut cfg_val;
    for part in parents {
        cur = cur
            .as_object_mut()
            .and_then(|obj| obj.get_mut(*part))
            .ok_or_else(|| format!("Invalid config path: {}", key))?;
    }
    let obj = cur.as_object_mut().ok_or_else(|| format!("Invalid config path: {}", key))?;
    obj.insert(last.to_string(), value);

    serde_json::from_value::<Config>(cfg_val)
        .map_err(|e| format!("Failed to deserialize config after setting '{}': {}", key, e))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use test_log::test;

    use super::*;
    use crate::actor::tile::CycleVariant;
    use crate::common::config::ActuationMode;

    struct Fixture {
        actor: ConfigActor,
        watcher_rx: watcher::Receiver,
        actuator_rx: actuator::Receiver,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (watcher_tx, watcher_rx) = actor::channel();
        let (actuator_tx, actuator_rx) = actor::channel();
        let actor = ConfigActor::new(
            Config::default(),
            watcher_tx,
            actuator::Handle::new(actuator_tx),
            dir.path().join("config.toml"),
        );
        Fixture { actor, watcher_rx, actuator_rx, _dir: dir }
    }

    #[test]
    fn strategy_change_reaches_actuator_and_watcher() {
        let mut f = fixture();
        f.actor.handle_config_command(ConfigCommand::SetStrategy(ActuationMode::GlobalSettings)).unwrap();

        let (_, request) = f.actuator_rx.try_recv().unwrap();
        assert!(matches!(request, actuator::Request::SetMode(ActuationMode::GlobalSettings)));
        let (_, event) = f.watcher_rx.try_recv().unwrap();
        assert!(matches!(event, watcher::Event::ConfigUpdated(s) if s.strategy == ActuationMode::GlobalSettings));
    }

    #[test]
    fn unchanged_config_is_not_forwarded() {
        let mut f = fixture();
        f.actor.handle_config_command(ConfigCommand::SetHotReload(true)).unwrap();
        assert!(f.watcher_rx.try_recv().is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut f = fixture();
        let err = f.actor.handle_config_command(ConfigCommand::SetAspectRatioThreshold(0.5)).unwrap_err();
        assert!(err.contains("aspect_ratio_threshold"), "{err}");
        assert_eq!(f.actor.config(), &Config::default());
    }

    #[test]
    fn generic_set_by_path() {
        let mut f = fixture();
        f.actor
            .handle_config_command(ConfigCommand::Set {
                key: "tiles.global".into(),
                value: json!("reduced"),
            })
            .unwrap();
        assert_eq!(f.actor.config().tiles.global, CycleVariant::Reduced);

        let err = f
            .actor
            .handle_config_command(ConfigCommand::Set {
                key: "tiles.nope.deeper".into(),
                value: json!(1),
            })
            .unwrap_err();
        assert!(err.contains("Invalid config path"), "{err}");

        let err = f
            .actor
            .handle_config_command(ConfigCommand::Set {
                key: "settings.strategy".into(),
                value: json!("sideways"),
            })
            .unwrap_err();
        assert!(err.contains("Failed to deserialize"), "{err}");
    }

    #[test]
    fn save_then_reload() {
        let mut f = fixture();
        assert!(f.actor.handle_config_command(ConfigCommand::ReloadConfig).is_err());

        f.actor.handle_config_command(ConfigCommand::SetAspectRatioThreshold(1.3)).unwrap();
        f.actor.handle_config_command(ConfigCommand::SaveConfig).unwrap();
        f.actor.handle_config_command(ConfigCommand::SetAspectRatioThreshold(1.5)).unwrap();
        f.actor.handle_config_command(ConfigCommand::ReloadConfig).unwrap();
        assert_eq!(f.actor.config().settings.aspect_ratio_threshold, 1.3);
    }
}
