use anyhow::{bail, Result};
use chrono::Utc;
use collection::{
    coordinator::PollingCoordinator, focus::FocusTracker, keystrokes::KeystrokeCounter,
    KeystrokeSampler,
};
use config::TrackerConfig;
use instance::SingleInstanceGuard;
use processing::store_writer::StoreWriter;
use storage::event_store::EventStore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    utils::{
        clock::{Clock, DefaultClock},
        time::today,
    },
    window_api::{GenericWindowSource, WindowSource},
};

pub mod args;
pub mod collection;
pub mod config;
pub mod instance;
pub mod processing;
pub mod shutdown;
pub mod storage;

pub const LAST_STARTED_AT_KEY: &str = "last_started_at";

/// Represents the starting point for the daemon. Fails when another daemon owns the store.
pub async fn start_daemon(config: TrackerConfig) -> Result<()> {
    let pid_file = config.pid_file();
    let status = instance::is_running(&pid_file)?;
    if status.running {
        bail!(
            "daybook daemon is already running (pid {})",
            status.pid.map_or_else(|| "unknown".into(), |p| p.to_string())
        );
    }

    let Some(guard) = SingleInstanceGuard::acquire(&pid_file)? else {
        bail!("Could not lock {pid_file:?}, another instance may be starting");
    };

    // The guard is dropped on every early return, which releases the pid file.
    let store = open_store(&config)?;
    let window_source = GenericWindowSource::new()?;
    let keystrokes = config.keystrokes.then(KeystrokeCounter::new);

    info!("daybook daemon started (pid {})", std::process::id());
    info!("Store: {:?}, pid file: {:?}", config.database_path, guard.path());
    info!(
        "Keystroke counting: {}",
        if keystrokes.is_some() { "enabled" } else { "disabled" }
    );
    if keystrokes.is_some() {
        info!("No keystroke hook is built in, counts only arrive through KeystrokeCounter::handle");
    }
    info!(
        "Window titles: {}",
        if config.window_titles { "enabled" } else { "disabled" }
    );

    let shutdown_token = CancellationToken::new();
    let (_, result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        async {
            let result = run_tracker(
                &config,
                store,
                window_source,
                keystrokes,
                &shutdown_token,
                DefaultClock,
            )
            .await;
            // Lets the signal listener finish if polling ended on its own.
            shutdown_token.cancel();
            result
        },
    );

    if let Err(e) = &result {
        error!("Polling ended with an error {e:?}");
    }
    guard.release();
    info!("daybook daemon stopped");
    result
}

/// Opens the store, applies retention and records the start.
fn open_store(config: &TrackerConfig) -> Result<EventStore> {
    let store = EventStore::open(config.database_path.clone())?;
    if config.retention_days > 0 {
        let purged =
            store.purge_older_than(config.retention_days, today(config.day_boundary_hour))?;
        info!(
            "Purged {purged} old records (retention: {} days)",
            config.retention_days
        );
    }
    store.set_setting(LAST_STARTED_AT_KEY, &Utc::now())?;
    Ok(store)
}

/// Runs the polling loop until `shutdown` is cancelled. Keystroke hooks feed `keystrokes`
/// through [KeystrokeCounter::handle].
pub async fn run_tracker(
    config: &TrackerConfig,
    store: EventStore,
    window_source: impl WindowSource + 'static,
    keystrokes: Option<KeystrokeCounter>,
    shutdown: &CancellationToken,
    clock: impl Clock,
) -> Result<()> {
    create_coordinator(config, store, window_source, keystrokes, shutdown, clock)
        .run()
        .await
}

fn create_coordinator(
    config: &TrackerConfig,
    store: EventStore,
    window_source: impl WindowSource + 'static,
    keystrokes: Option<KeystrokeCounter>,
    shutdown: &CancellationToken,
    clock: impl Clock,
) -> PollingCoordinator<StoreWriter> {
    PollingCoordinator::new(
        Box::new(FocusTracker::new(window_source).with_titles(config.window_titles)),
        keystrokes.map(|k| Box::new(k) as Box<dyn KeystrokeSampler>),
        StoreWriter::new(store),
        shutdown.clone(),
        config.polling_settings(),
        Box::new(clock),
    )
}
