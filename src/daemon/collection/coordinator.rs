use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    daemon::{
        processing::{EventProcessor, TrackedEvent},
        storage::error::StoreError,
    },
    utils::{clock::Clock, time::logical_date},
};

use super::{KeystrokeSampler, WindowSampler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Stopped,
    Running,
    Stopping,
}

/// Timing knobs of [PollingCoordinator].
#[derive(Debug, Clone, Copy)]
pub struct PollingSettings {
    pub interval: Duration,
    pub retry_backoff: Duration,
    pub day_boundary_hour: u32,
}

/// Drives sampling. Every tick polls the window sampler and then the keystroke sampler, stamps
/// whatever they report and hands it to the processor.
pub struct PollingCoordinator<P> {
    window_sampler: Box<dyn WindowSampler>,
    keystroke_sampler: Option<Box<dyn KeystrokeSampler>>,
    processor: P,
    shutdown: CancellationToken,
    settings: PollingSettings,
    time_provider: Box<dyn Clock>,
    state: watch::Sender<CoordinatorState>,
}

/// Errors worth waiting out: the store couldn't be reached or the disk misbehaved.
fn is_transient(error: &anyhow::Error) -> bool {
    if let Some(store_error) = error.downcast_ref::<StoreError>() {
        return store_error.is_transient();
    }
    error.downcast_ref::<std::io::Error>().is_some()
}

impl<P: EventProcessor> PollingCoordinator<P> {
    pub fn new(
        window_sampler: Box<dyn WindowSampler>,
        keystroke_sampler: Option<Box<dyn KeystrokeSampler>>,
        processor: P,
        shutdown: CancellationToken,
        settings: PollingSettings,
        time_provider: Box<dyn Clock>,
    ) -> Self {
        let (state, _) = watch::channel(CoordinatorState::Stopped);
        Self {
            window_sampler,
            keystroke_sampler,
            processor,
            shutdown,
            settings,
            time_provider,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.state.subscribe()
    }

    fn stamp(&self) -> (DateTime<Utc>, NaiveDate) {
        let timestamp = self.time_provider.current_instant();
        (
            timestamp,
            logical_date(timestamp, self.settings.day_boundary_hour),
        )
    }

    async fn record_window(&mut self, timestamp: DateTime<Utc>, date: NaiveDate) -> Result<()> {
        let window = match self.window_sampler.poll() {
            Ok(Some(window)) => window,
            Ok(None) => return Ok(()),
            Err(e) => {
                error!("Window sampler failed {e:?}");
                return Ok(());
            }
        };

        let event = TrackedEvent::Window {
            timestamp,
            logical_date: date,
            window,
        };
        if let Err(e) = self.processor.process_next(event).await {
            self.window_sampler.forget();
            if is_transient(&e) {
                return Err(e);
            }
            error!("Failed to record window change {e:?}");
        }
        Ok(())
    }

    async fn record_keys(&mut self, timestamp: DateTime<Utc>, date: NaiveDate) -> Result<()> {
        let Some(sampler) = self.keystroke_sampler.as_mut() else {
            return Ok(());
        };
        let count = match sampler.poll() {
            Ok(count) => count,
            Err(e) => {
                error!("Keystroke sampler failed {e:?}");
                return Ok(());
            }
        };
        if count == 0 {
            return Ok(());
        }

        let event = TrackedEvent::Keys {
            timestamp,
            logical_date: date,
            count,
        };
        if let Err(e) = self.processor.process_next(event).await {
            if is_transient(&e) {
                if let Some(sampler) = self.keystroke_sampler.as_mut() {
                    sampler.restore(count);
                }
                return Err(e);
            }
            error!("Failed to record {count} keystrokes {e:?}");
        }
        Ok(())
    }

    /// One polling cycle. Only transient errors are returned; anything else is logged here.
    async fn tick(&mut self) -> Result<()> {
        let (timestamp, date) = self.stamp();
        self.record_window(timestamp, date).await?;
        self.record_keys(timestamp, date).await
    }

    /// Executes the polling loop until the shutdown token is cancelled.
    pub async fn run(mut self) -> Result<()> {
        self.state.send_replace(CoordinatorState::Running);
        info!(
            "Polling every {:?}, logical day starts at {}:00",
            self.settings.interval, self.settings.day_boundary_hour
        );

        let mut next_tick = self.time_provider.instant();
        loop {
            next_tick += self.settings.interval;

            let span = info_span!("tick");
            if let Err(e) = self.tick().instrument(span).await {
                warn!(
                    "Store unavailable, retrying in {:?}: {e:?}",
                    self.settings.retry_backoff
                );
                next_tick = self.time_provider.instant() + self.settings.retry_backoff;
            }

            tokio::select! {
                // A tick is never interrupted, cancellation is only observed between ticks.
                _ = self.shutdown.cancelled() => break,
                _ = self.time_provider.sleep_until(next_tick) => ()
            }
        }

        self.state.send_replace(CoordinatorState::Stopping);
        debug!("Flushing buffered keystrokes");
        let (timestamp, date) = self.stamp();
        if let Err(e) = self.record_keys(timestamp, date).await {
            error!("Final keystroke flush failed {e:?}");
        }
        let result = self.processor.finalize().await;
        self.state.send_replace(CoordinatorState::Stopped);
        info!("Polling stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use crate::{
        daemon::{
            collection::{
                keystrokes::KeystrokeCounter, KeystrokeSampler, MockKeystrokeSampler,
                MockWindowSampler,
            },
            processing::{EventProcessor, TrackedEvent},
            storage::error::StoreError,
        },
        utils::{clock::Clock, logging::TEST_LOGGING, time::logical_date},
        window_api::FocusedWindow,
    };

    use super::{CoordinatorState, PollingCoordinator, PollingSettings};

    const SETTINGS: PollingSettings = PollingSettings {
        interval: Duration::from_secs(1),
        retry_backoff: Duration::from_secs(5),
        day_boundary_hour: 0,
    };

    #[derive(Clone)]
    struct TestClock {
        start_time: DateTime<Utc>,
        reference: Instant,
    }

    impl TestClock {
        fn new() -> Self {
            Self {
                start_time: Utc.with_ymd_and_hms(2018, 7, 4, 12, 0, 0).unwrap(),
                reference: Instant::now(),
            }
        }
    }

    #[async_trait]
    impl Clock for TestClock {
        fn time(&self) -> DateTime<Utc> {
            self.start_time + self.reference.elapsed()
        }

        fn instant(&self) -> Instant {
            Instant::now()
        }

        async fn sleep_until(&self, instant: Instant) {
            tokio::time::sleep_until(instant).await;
        }
    }

    /// Collects events in memory. Fails the first `failures` writes with the given error kind.
    #[derive(Clone, Default)]
    struct RecordingProcessor {
        events: Arc<Mutex<Vec<TrackedEvent>>>,
        failures: Arc<Mutex<Vec<fn() -> anyhow::Error>>>,
        finalized: Arc<Mutex<bool>>,
    }

    impl RecordingProcessor {
        fn failing_with(errors: Vec<fn() -> anyhow::Error>) -> Self {
            Self {
                failures: Arc::new(Mutex::new(errors)),
                ..Default::default()
            }
        }

        fn events(&self) -> Vec<TrackedEvent> {
            self.events.lock().unwrap().clone()
        }

        fn key_total(&self) -> u64 {
            self.events()
                .iter()
                .map(|e| match e {
                    TrackedEvent::Keys { count, .. } => *count,
                    _ => 0,
                })
                .sum()
        }
    }

    impl EventProcessor for RecordingProcessor {
        async fn process_next(&mut self, event: TrackedEvent) -> Result<()> {
            let failure = {
                let mut failures = self.failures.lock().unwrap();
                (!failures.is_empty()).then(|| failures.remove(0))
            };
            if let Some(failure) = failure {
                return Err(failure());
            }
            self.events.lock().unwrap().push(event);
            Ok(())
        }

        async fn finalize(&mut self) -> Result<()> {
            *self.finalized.lock().unwrap() = true;
            Ok(())
        }
    }

    fn transient() -> anyhow::Error {
        std::io::Error::new(std::io::ErrorKind::Other, "disk busy").into()
    }

    fn fatal() -> anyhow::Error {
        StoreError::InvalidValue {
            column: "key_count",
            value: "-1".into(),
        }
        .into()
    }

    fn window(app: &str) -> FocusedWindow {
        FocusedWindow {
            app_name: app.into(),
            window_title: None,
            browser_url: None,
        }
    }

    fn quiet_window_sampler() -> MockWindowSampler {
        let mut sampler = MockWindowSampler::new();
        sampler.expect_poll().returning(|| Ok(None));
        sampler.expect_forget().return_const(());
        sampler
    }

    fn coordinator(
        window_sampler: MockWindowSampler,
        keystroke_sampler: Option<Box<dyn KeystrokeSampler>>,
        processor: RecordingProcessor,
        shutdown: &CancellationToken,
    ) -> PollingCoordinator<RecordingProcessor> {
        PollingCoordinator::new(
            Box::new(window_sampler),
            keystroke_sampler,
            processor,
            shutdown.clone(),
            SETTINGS,
            Box::new(TestClock::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn records_window_changes_and_keys() -> Result<()> {
        *TEST_LOGGING;
        let mut window_sampler = MockWindowSampler::new();
        let mut items = vec![Some(window("editor")), None, Some(window("browser"))]
            .into_iter()
            .chain(std::iter::repeat(None));
        window_sampler
            .expect_poll()
            .returning(move || Ok(items.next().flatten()));

        let counter = KeystrokeCounter::new();
        let handle = counter.handle();
        handle.record(3);

        let processor = RecordingProcessor::default();
        let shutdown = CancellationToken::new();
        let coordinator = coordinator(
            window_sampler,
            Some(Box::new(counter)),
            processor.clone(),
            &shutdown,
        );

        let (_, result) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(2500)).await;
                handle.record(2);
                tokio::time::sleep(Duration::from_millis(1000)).await;
                shutdown.cancel();
            },
            coordinator.run(),
        );
        result?;

        let events = processor.events();
        let windows = events
            .iter()
            .filter_map(|e| match e {
                TrackedEvent::Window { window, .. } => Some(window.app_name.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(windows, vec!["editor", "browser"]);
        assert_eq!(processor.key_total(), 5);

        let expected_date = logical_date(Utc.with_ymd_and_hms(2018, 7, 4, 12, 0, 0).unwrap(), 0);
        for event in &events {
            match event {
                TrackedEvent::Window {
                    timestamp,
                    logical_date,
                    ..
                }
                | TrackedEvent::Keys {
                    timestamp,
                    logical_date,
                    ..
                } => {
                    assert_eq!(timestamp.timestamp_subsec_nanos(), 0);
                    assert_eq!(*logical_date, expected_date);
                }
            }
        }
        assert!(*processor.finalized.lock().unwrap());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn keystrokes_are_flushed_on_shutdown() -> Result<()> {
        let counter = KeystrokeCounter::new();
        let handle = counter.handle();
        let processor = RecordingProcessor::default();
        let shutdown = CancellationToken::new();
        let coordinator = coordinator(
            quiet_window_sampler(),
            Some(Box::new(counter)),
            processor.clone(),
            &shutdown,
        );

        let (_, result) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(1500)).await;
                // Typed after the last tick, only the shutdown flush can pick these up.
                handle.record(7);
                shutdown.cancel();
            },
            coordinator.run(),
        );
        result?;

        assert_eq!(processor.key_total(), 7);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_and_keep_keys() -> Result<()> {
        let counter = KeystrokeCounter::new();
        let handle = counter.handle();
        handle.record(4);
        let processor = RecordingProcessor::failing_with(vec![transient as fn() -> anyhow::Error]);
        let shutdown = CancellationToken::new();
        let coordinator = coordinator(
            quiet_window_sampler(),
            Some(Box::new(counter)),
            processor.clone(),
            &shutdown,
        );

        let (_, result) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(4000)).await;
                // Still backing off, nothing got through yet.
                assert_eq!(processor.key_total(), 0);
                tokio::time::sleep(Duration::from_millis(2000)).await;
                assert_eq!(processor.key_total(), 4);
                shutdown.cancel();
            },
            coordinator.run(),
        );
        result?;

        assert_eq!(processor.key_total(), 4);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn bad_ticks_do_not_stop_the_loop() -> Result<()> {
        let mut window_sampler = MockWindowSampler::new();
        let mut polls = 0;
        window_sampler.expect_poll().returning(move || {
            polls += 1;
            match polls {
                1 => Err(anyhow!("sampler threw")),
                2 => Ok(Some(window("rejected"))),
                3 => Ok(Some(window("accepted"))),
                _ => Ok(None),
            }
        });
        window_sampler.expect_forget().times(1).return_const(());

        let mut keystroke_sampler = MockKeystrokeSampler::new();
        keystroke_sampler.expect_poll().returning(|| Ok(0));

        let processor = RecordingProcessor::failing_with(vec![fatal as fn() -> anyhow::Error]);
        let shutdown = CancellationToken::new();
        let coordinator = coordinator(
            window_sampler,
            Some(Box::new(keystroke_sampler)),
            processor.clone(),
            &shutdown,
        );

        let (_, result) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(3500)).await;
                shutdown.cancel();
            },
            coordinator.run(),
        );
        result?;

        let events = processor.events();
        assert!(matches!(
            events.as_slice(),
            [TrackedEvent::Window { window, .. }] if window.app_name == "accepted"
        ));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_keystrokes_write_nothing() -> Result<()> {
        let processor = RecordingProcessor::default();
        let shutdown = CancellationToken::new();
        let coordinator = coordinator(quiet_window_sampler(), None, processor.clone(), &shutdown);

        let (_, result) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(2500)).await;
                shutdown.cancel();
            },
            coordinator.run(),
        );
        result?;
        assert!(processor.events().is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn state_moves_through_lifecycle() -> Result<()> {
        let processor = RecordingProcessor::default();
        let shutdown = CancellationToken::new();
        let coordinator = coordinator(quiet_window_sampler(), None, processor, &shutdown);
        let mut state = coordinator.subscribe();
        assert_eq!(*state.borrow(), CoordinatorState::Stopped);

        let (_, result) = tokio::join!(
            async {
                let running = state
                    .wait_for(|s| *s == CoordinatorState::Running)
                    .await
                    .map(|_| ());
                assert!(running.is_ok());
                shutdown.cancel();
            },
            coordinator.run(),
        );
        result?;
        assert_eq!(*state.borrow(), CoordinatorState::Stopped);
        Ok(())
    }
}
