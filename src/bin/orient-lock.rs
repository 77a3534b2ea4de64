use std::io::BufRead;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use orient_lock::actor::actuator::ActuatorActor;
use orient_lock::actor::config::ConfigActor;
use orient_lock::actor::config_watcher::ConfigWatcher;
use orient_lock::actor::state_observer::StateObserver;
use orient_lock::actor::tile::{TileKind, TileMachine};
use orient_lock::actor::watcher::{self, ForegroundWatcher};
use orient_lock::common::config::{Config, config_file};
use orient_lock::common::error::OrientationError;
use orient_lock::common::log;
use orient_lock::model::state::OrientationState;
use orient_lock::model::{
    AppOrientationSetting, DisplayId, FileSettingStore, Orientation, SettingStore, TargetScreen,
};
use orient_lock::sys::executor::Executor;
use orient_lock::sys::headless::HeadlessPlatform;
use orient_lock::sys::platform::{DisplayProvider, ForegroundApps};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(about = "Per-app, per-display screen orientation lock")]
struct Cli {
    /// Path to configuration file to use (overrides default).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Settings file to use instead of the configured one.
    #[arg(long, value_name = "PATH")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch foreground apps. Reads one package name per line from stdin.
    Run,
    /// Store an orientation for an app.
    Set {
        package: String,
        orientation: Orientation,
        /// Display the setting applies to. Omit for all screens.
        #[arg(long)]
        display: Option<u32>,
        /// Label shown for the app. Defaults to the platform label.
        #[arg(long)]
        name: Option<String>,
    },
    /// Remove an app's settings, or only the one for a display (-1 for all screens).
    Remove {
        package: String,
        #[arg(long, allow_negative_numbers = true)]
        display: Option<i64>,
    },
    Enable { package: String },
    Disable { package: String },
    /// List every stored setting.
    List,
    /// Show which setting would apply to an app right now.
    Resolve { package: String },
    /// Tap a quick-settings tile.
    Tile {
        kind: TileArg,
        /// Foreground app, for the per-app tile.
        #[arg(long)]
        foreground: Option<String>,
        #[arg(long, default_value_t = 1)]
        clicks: u32,
    },
    /// Print the current state as JSON.
    Status,
    /// Check the configuration file.
    Validate,
}

#[derive(Clone, Copy, ValueEnum)]
enum TileArg {
    Global,
    CurrentApp,
    Legacy,
}

impl From<TileArg> for TileKind {
    fn from(arg: TileArg) -> Self {
        match arg {
            TileArg::Global => TileKind::Global,
            TileArg::CurrentApp => TileKind::CurrentApp,
            TileArg::Legacy => TileKind::Legacy,
        }
    }
}

fn main() {
    sigpipe::reset();
    let opt = Cli::parse();
    log::init_logging();
    install_panic_hook();

    if let Err(e) = run(opt) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn run(opt: Cli) -> anyhow::Result<()> {
    let config_path = opt.config.clone().unwrap_or_else(config_file);
    let config = if config_path.exists() {
        Config::read(&config_path)
            .with_context(|| format!("reading {}", config_path.display()))?
    } else {
        Config::shipped()
    };
    let issues = config.validate();
    if !issues.is_empty() {
        for issue in &issues {
            eprintln!("{}", issue);
        }
        bail!("invalid configuration: {} issue(s) found", issues.len());
    }

    let store_path = opt.store.clone().unwrap_or_else(|| config.settings.store_path());
    let store = Arc::new(FileSettingStore::open(store_path)?);
    let platform = Arc::new(HeadlessPlatform::new(&config.headless));

    match opt.command {
        Commands::Run => serve(config, config_path, store, platform),
        Commands::Set { package, orientation, display, name } => {
            let target_screen = match display {
                None => TargetScreen::AllScreens,
                Some(id) => {
                    let info = platform
                        .display(DisplayId::new(id))
                        .ok_or(OrientationError::InvalidDisplayId(id as i64))?;
                    TargetScreen::SpecificScreen {
                        id: info.id,
                        aspect_ratio: info.aspect_ratio(config.settings.aspect_ratio_threshold),
                        name: info.name,
                    }
                }
            };
            let app_name = name
                .or_else(|| platform.app_label(&package))
                .unwrap_or_else(|| package.clone());
            store.upsert(AppOrientationSetting::new(package, app_name, orientation, target_screen))?;
            Ok(())
        }
        Commands::Remove { package, display } => {
            let removed = match display {
                Some(id) => usize::from(store.delete(&package, id)?),
                None => store.delete_package(&package)?,
            };
            println!("removed {removed} setting(s)");
            Ok(())
        }
        Commands::Enable { package } => set_enabled(store.as_ref(), &package, true),
        Commands::Disable { package } => set_enabled(store.as_ref(), &package, false),
        Commands::List => {
            for s in store.all()? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    s.package_name,
                    s.display_raw_id(),
                    s.target_screen.name(),
                    s.orientation,
                    if s.enabled { "enabled" } else { "disabled" },
                );
            }
            Ok(())
        }
        Commands::Resolve { package } => {
            match watcher::effective_orientation(
                store.as_ref(),
                platform.as_ref(),
                &package,
                config.settings.aspect_ratio_threshold,
            )? {
                Some((orientation, target)) => println!("{orientation} on {target:?}"),
                None => println!("no setting applies; orientation left unchanged"),
            }
            Ok(())
        }
        Commands::Tile { kind, foreground, clicks } => {
            if let Some(pkg) = &foreground {
                platform.set_foreground(pkg);
            }
            tap_tile(&config, kind.into(), clicks, store, platform)
        }
        Commands::Status => {
            let state = OrientationState::observe(store.as_ref(), store.as_ref(), platform.as_ref());
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        Commands::Validate => {
            if !config_path.exists() {
                bail!("{} does not exist", config_path.display());
            }
            println!("Config validation passed");
            Ok(())
        }
    }
}

fn set_enabled(store: &dyn SettingStore, package: &str, enabled: bool) -> anyhow::Result<()> {
    let changed = store.set_enabled(package, enabled)?;
    if changed == 0 && store.for_package(package)?.is_empty() {
        bail!("no settings stored for {package}");
    }
    Ok(())
}

fn tap_tile(
    config: &Config,
    kind: TileKind,
    clicks: u32,
    store: Arc<FileSettingStore>,
    platform: Arc<HeadlessPlatform>,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let (actuator, actuator_thread) =
        ActuatorActor::spawn(config.settings.strategy, platform.clone(), cancel.clone());
    let mut tile = TileMachine::new(
        kind,
        kind.cycle(&config.tiles),
        store.clone(),
        store,
        platform,
        actuator,
    )
    .with_aspect_ratio_threshold(config.settings.aspect_ratio_threshold);

    let state = Executor::run(async {
        tile.on_activate();
        for _ in 0..clicks {
            tile.on_click().await;
        }
        tile.state().clone()
    });
    println!("{}", state.label);
    if let Some(subtitle) = state.subtitle {
        println!("{subtitle}");
    }

    cancel.cancel();
    _ = actuator_thread.join();
    Ok(())
}

fn serve(
    config: Config,
    config_path: PathBuf,
    store: Arc<FileSettingStore>,
    platform: Arc<HeadlessPlatform>,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    // Cancelled at end of input; the root token also cancels it.
    let input_done = cancel.child_token();

    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel()).context("installing Ctrl+C handler")?;
    }

    let (actuator, actuator_thread) =
        ActuatorActor::spawn(config.settings.strategy, platform.clone(), cancel.clone());

    let (watcher_tx, watcher_rx) = orient_lock::actor::channel();
    let foreground_watcher =
        ForegroundWatcher::new(&config.settings, store.clone(), platform.clone(), actuator.clone());
    let watcher_thread = Executor::spawn("watcher", {
        let cancel = cancel.clone();
        move || foreground_watcher.run(watcher_rx, cancel)
    });

    let config_tx =
        ConfigActor::spawn(config.clone(), watcher_tx.clone(), actuator, config_path.clone());
    let config_watcher_thread = config
        .settings
        .hot_reload
        .then(|| ConfigWatcher::spawn(config_tx.clone(), &config, config_path, input_done.clone()));
    drop(config_tx);

    let (observer, mut state_rx) =
        StateObserver::new(store.clone(), store.clone(), platform.clone());
    let observer_thread = Executor::spawn("state_observer", {
        let cancel = cancel.clone();
        move || observer.run(cancel)
    });

    info!("reading foreground packages from stdin");
    // A blocked stdin read must not hold up shutdown, so lines are read on a
    // plain thread that is never joined.
    let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if line_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("stdin: {e}");
                        break;
                    }
                }
            }
        })
        .context("spawning stdin reader")?;

    Executor::run(async {
        loop {
            let line = tokio::select! {
                _ = input_done.cancelled() => break,
                Ok(()) = state_rx.changed() => {
                    let state = state_rx.borrow_and_update();
                    info!(
                        settings = state.per_app_settings.len(),
                        global = %state.global_orientation,
                        "state changed"
                    );
                    continue;
                }
                line = line_rx.recv() => match line {
                    Some(line) => line,
                    None => break,
                },
            };
            let package = line.trim();
            if package.is_empty() || package.starts_with('#') {
                continue;
            }
            platform.set_foreground(package);
            watcher_tx.send(watcher::Event::WindowStateChanged(package.to_string()));
        }
    });

    // Let the watcher drain what was already read: its channel closes once the
    // config components holding a sender have stopped.
    input_done.cancel();
    drop(watcher_tx);
    if let Some(thread) = config_watcher_thread {
        _ = thread.join();
    }
    _ = watcher_thread.join();

    cancel.cancel();
    _ = actuator_thread.join();
    _ = observer_thread.join();

    let state = OrientationState::observe(store.as_ref(), store.as_ref(), platform.as_ref());
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

#[cfg(panic = "unwind")]
fn install_panic_hook() {
    // Abort on panic instead of leaving a half-running set of actor threads.
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        original_hook(info);
        std::process::abort();
    }));
}

#[cfg(not(panic = "unwind"))]
fn install_panic_hook() {}
