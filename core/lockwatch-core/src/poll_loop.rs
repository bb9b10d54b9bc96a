//! The detection-and-debounce loop.
//!
//! ```text
//! Stopped ──run()──▶ Running ──request_stop()──▶ StopRequested ──▶ Stopped
//! ```
//!
//! Each cycle: check for stop (bounded slice) → reload config → validate the
//! interval → sample the selected detector → feed the tracker → notify on a
//! transition → wait the interval. A failed cycle is logged and followed by
//! a backoff; only a [`FatalError`] ends the loop early.

use crate::config::{ConfigSource, DEFAULT_CHECK_INTERVAL_SECS};
use crate::detect::Detectors;
use crate::error::{panic_message, FatalError, IterationError};
use crate::notifier::{Delivery, Notifier};
use crate::run_state::{RunState, StopHandle};
use crate::tracker::TransitionTracker;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

pub const DEFAULT_STOP_CHECK_UNITS: u32 = 1;
pub const DEFAULT_ERROR_BACKOFF_UNITS: u32 = 5;

/// Wait lengths, in multiples of `unit` (one second in production).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTiming {
    pub unit: Duration,
    pub stop_check_units: u32,
    pub error_backoff_units: u32,
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            unit: Duration::from_secs(1),
            stop_check_units: DEFAULT_STOP_CHECK_UNITS,
            error_backoff_units: DEFAULT_ERROR_BACKOFF_UNITS,
        }
    }
}

impl LoopTiming {
    pub fn with_unit(unit: Duration) -> Self {
        Self {
            unit,
            ..Self::default()
        }
    }

    pub fn stop_check(&self) -> Duration {
        self.unit * self.stop_check_units
    }

    pub fn error_backoff(&self) -> Duration {
        self.unit * self.error_backoff_units
    }

    pub fn interval(&self, secs: u64) -> Duration {
        self.unit * u32::try_from(secs).unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub iterations: u64,
    pub transitions: u64,
    pub notifications_sent: u64,
    pub notifications_skipped: u64,
    pub notification_failures: u64,
    pub iteration_errors: u64,
}

pub struct PollLoop<C: ConfigSource, N: Notifier> {
    config: C,
    detectors: Detectors,
    notifier: N,
    tracker: TransitionTracker,
    run_state: RunState,
    timing: LoopTiming,
    stats: LoopStats,
}

impl<C: ConfigSource, N: Notifier> PollLoop<C, N> {
    pub fn new(config: C, detectors: Detectors, notifier: N) -> Self {
        Self {
            config,
            detectors,
            notifier,
            tracker: TransitionTracker::new(),
            run_state: RunState::new(),
            timing: LoopTiming::default(),
            stats: LoopStats::default(),
        }
    }

    pub fn with_timing(mut self, timing: LoopTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.run_state.handle()
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn tracker(&self) -> &TransitionTracker {
        &self.tracker
    }

    /// Runs until a stop is requested. Returns the final stats, or the fatal
    /// error that halted the loop. The run state is `Stopped` either way.
    pub fn run(&mut self) -> Result<LoopStats, FatalError> {
        let result = self.run_state.mark_running().and_then(|()| {
            tracing::info!(timing = ?self.timing, "Lock watch loop started");
            panic::catch_unwind(AssertUnwindSafe(|| self.run_until_stopped()))
                .unwrap_or_else(|payload| Err(FatalError::Panicked(panic_message(&*payload))))
        });
        self.run_state.mark_stopped();

        match &result {
            Ok(stats) => tracing::info!(stats = ?stats, "Lock watch loop stopped"),
            Err(err) => tracing::error!(
                severity = "critical",
                error = %err,
                stats = ?self.stats,
                "Lock watch loop halted by fatal error"
            ),
        }
        result
    }

    fn run_until_stopped(&mut self) -> Result<LoopStats, FatalError> {
        loop {
            if self.run_state.wait_for_stop(self.timing.stop_check())? {
                tracing::info!("Stop signal received; leaving poll loop");
                break;
            }

            let wait = match self.run_once() {
                Ok(wait) => wait,
                Err(err) => {
                    tracing::error!(
                        error = %err,
                        backoff_ms = self.timing.error_backoff().as_millis() as u64,
                        "Poll iteration failed; backing off"
                    );
                    self.timing.error_backoff()
                }
            };

            if self.run_state.wait_for_stop(wait)? {
                tracing::info!("Stop signal received; leaving poll loop");
                break;
            }
        }
        Ok(self.stats.clone())
    }

    /// One isolated poll cycle. Returns how long to wait before the next one.
    /// A panic inside the cycle is caught and reported as an iteration error.
    pub fn run_once(&mut self) -> Result<Duration, IterationError> {
        self.stats.iterations += 1;
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.poll_cycle()))
            .unwrap_or_else(|payload| Err(IterationError::Panicked(panic_message(&*payload))));
        if result.is_err() {
            self.stats.iteration_errors += 1;
        }
        result
    }

    fn poll_cycle(&mut self) -> Result<Duration, IterationError> {
        let config = self.config.snapshot();
        let interval_secs = match config.interval_secs() {
            Some(secs) => secs,
            None => {
                tracing::error!(
                    check_interval = ?config.check_interval,
                    default = DEFAULT_CHECK_INTERVAL_SECS,
                    "Invalid check interval; using default"
                );
                DEFAULT_CHECK_INTERVAL_SECS
            }
        };

        let detector = self.detectors.select(config.detection_method);
        let observation = detector.observe()?;
        tracing::debug!(
            locked = observation.locked,
            user = ?observation.user,
            method = config.detection_method.as_str(),
            "Lock state sampled"
        );

        if let Some(transition) = self.tracker.observe_at(
            observation.locked,
            observation.user.as_deref(),
            observation.observed_at,
        ) {
            self.stats.transitions += 1;
            tracing::info!(
                kind = ?transition.kind,
                previous_state_secs = transition.previous_state_lasted.map(|lasted| lasted.num_seconds()),
                "{}",
                transition.message
            );
            self.dispatch(&config.webhook_url, &transition.message);
        }

        tracing::debug!(interval_secs, "Waiting for next sample");
        Ok(self.timing.interval(interval_secs))
    }

    fn dispatch(&mut self, endpoint: &str, message: &str) {
        match self.notifier.notify(endpoint, message) {
            Ok(Delivery::Sent) => {
                self.stats.notifications_sent += 1;
                tracing::info!("Notification delivered");
            }
            Ok(Delivery::Skipped) => {
                self.stats.notifications_skipped += 1;
            }
            Err(err) => {
                self.stats.notification_failures += 1;
                tracing::error!(error = %err, "Notification failed; dropping message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_logs::{capture, has_event};
    use crate::config::{CheckInterval, DaemonConfig, DetectionMethod};
    use crate::detect::{LockDetector, LockObservation};
    use crate::error::{DetectionError, NotifyError};
    use crate::run_state::RunPhase;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Instant;

    type Script = Rc<RefCell<VecDeque<Result<bool, ()>>>>;

    /// Plays back a script; repeats the last entry once the script runs out.
    struct ScriptedDetector {
        method: DetectionMethod,
        script: Script,
        last: Result<bool, ()>,
    }

    impl LockDetector for ScriptedDetector {
        fn method(&self) -> DetectionMethod {
            self.method
        }

        fn observe(&mut self) -> Result<LockObservation, DetectionError> {
            if let Some(next) = self.script.borrow_mut().pop_front() {
                self.last = next;
            }
            match self.last {
                Ok(locked) => Ok(LockObservation::new(locked, Some("alice".to_string()))),
                Err(()) => Err(DetectionError::query("scripted", "detector down")),
            }
        }
    }

    fn scripted(script: Vec<Result<bool, ()>>) -> Detectors {
        let script: Script = Rc::new(RefCell::new(VecDeque::from(script)));
        Detectors::new(move |method| {
            Box::new(ScriptedDetector {
                method,
                script: Rc::clone(&script),
                last: Ok(false),
            }) as Box<dyn LockDetector>
        })
    }

    struct PanickingDetector;

    impl LockDetector for PanickingDetector {
        fn method(&self) -> DetectionMethod {
            DetectionMethod::Polling
        }

        fn observe(&mut self) -> Result<LockObservation, DetectionError> {
            panic!("detector exploded");
        }
    }

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<(String, String)>>>,
        failures: Arc<Mutex<VecDeque<bool>>>,
    }

    impl RecordingNotifier {
        fn failing_first(count: usize) -> Self {
            let notifier = Self::default();
            notifier
                .failures
                .lock()
                .expect("lock")
                .extend(std::iter::repeat(true).take(count));
            notifier
        }

        fn messages(&self) -> Vec<String> {
            self.sent
                .lock()
                .expect("lock")
                .iter()
                .map(|(_, message)| message.clone())
                .collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, endpoint: &str, message: &str) -> Result<Delivery, NotifyError> {
            self.sent
                .lock()
                .expect("lock")
                .push((endpoint.to_string(), message.to_string()));
            if self.failures.lock().expect("lock").pop_front().unwrap_or(false) {
                return Err(NotifyError::HttpStatus(500));
            }
            if endpoint.is_empty() {
                return Ok(Delivery::Skipped);
            }
            Ok(Delivery::Sent)
        }
    }

    struct ScriptedConfig {
        snapshots: VecDeque<DaemonConfig>,
        last: DaemonConfig,
    }

    impl ConfigSource for ScriptedConfig {
        fn snapshot(&mut self) -> DaemonConfig {
            if let Some(next) = self.snapshots.pop_front() {
                self.last = next;
            }
            self.last.clone()
        }
    }

    fn config(webhook_url: &str, check_interval: i64) -> DaemonConfig {
        DaemonConfig {
            webhook_url: webhook_url.to_string(),
            check_interval: check_interval.into(),
            ..DaemonConfig::default()
        }
    }

    fn millis() -> LoopTiming {
        LoopTiming::with_unit(Duration::from_millis(1))
    }

    #[test]
    fn default_timing_uses_one_second_units() {
        let timing = LoopTiming::default();
        assert_eq!(timing.stop_check(), Duration::from_secs(1));
        assert_eq!(timing.error_backoff(), Duration::from_secs(5));
        assert_eq!(timing.interval(60), Duration::from_secs(60));
    }

    #[test]
    fn notifies_once_per_edge() {
        let notifier = RecordingNotifier::default();
        let mut poll = PollLoop::new(
            config("https://hook.example/send", 2),
            scripted(vec![Ok(false), Ok(true), Ok(true), Ok(false)]),
            notifier.clone(),
        )
        .with_timing(millis());

        for _ in 0..4 {
            poll.run_once().expect("cycle");
        }

        assert_eq!(
            notifier.messages(),
            vec![
                "user alice locked the system".to_string(),
                "user alice unlocked the system".to_string(),
            ]
        );
        assert_eq!(poll.stats().transitions, 2);
        assert_eq!(poll.stats().notifications_sent, 2);
    }

    #[test]
    fn invalid_interval_falls_back_to_default() {
        let mut poll = PollLoop::new(
            config("", 500),
            scripted(vec![Ok(false)]),
            RecordingNotifier::default(),
        )
        .with_timing(millis());

        let (wait, logs) = capture(|| poll.run_once());
        assert_eq!(
            wait.expect("cycle"),
            Duration::from_millis(DEFAULT_CHECK_INTERVAL_SECS)
        );
        assert!(
            has_event(&logs, "ERROR", "Invalid check interval; using default"),
            "logs: {logs:?}"
        );
        assert_eq!(poll.stats().iteration_errors, 0);
    }

    #[test]
    fn non_integer_interval_falls_back_to_default() {
        let bad = DaemonConfig {
            webhook_url: "https://hook.example/send".to_string(),
            check_interval: CheckInterval::Invalid(serde_json::Value::from("5")),
            ..DaemonConfig::default()
        };
        let notifier = RecordingNotifier::default();
        let mut poll = PollLoop::new(bad, scripted(vec![Ok(true)]), notifier.clone())
            .with_timing(millis());

        assert_eq!(
            poll.run_once().expect("cycle"),
            Duration::from_millis(DEFAULT_CHECK_INTERVAL_SECS)
        );
        assert_eq!(notifier.messages(), vec!["user alice locked the system".to_string()]);
    }

    #[test]
    fn interval_changes_apply_on_next_cycle() {
        let source = ScriptedConfig {
            snapshots: VecDeque::from(vec![config("", 3), config("", 10), config("", 0)]),
            last: DaemonConfig::default(),
        };
        let mut poll = PollLoop::new(source, scripted(vec![]), RecordingNotifier::default())
            .with_timing(millis());

        assert_eq!(poll.run_once().expect("cycle"), Duration::from_millis(3));
        assert_eq!(poll.run_once().expect("cycle"), Duration::from_millis(10));
        assert_eq!(poll.run_once().expect("cycle"), Duration::from_millis(2));
    }

    #[test]
    fn detection_method_follows_config() {
        let used = Rc::new(RefCell::new(Vec::new()));
        let used_clone = Rc::clone(&used);
        let detectors = Detectors::new(move |method| {
            used_clone.borrow_mut().push(method);
            Box::new(ScriptedDetector {
                method,
                script: Rc::new(RefCell::new(VecDeque::new())),
                last: Ok(false),
            }) as Box<dyn LockDetector>
        });
        let polling = DaemonConfig {
            detection_method: DetectionMethod::Polling,
            ..DaemonConfig::default()
        };
        let source = ScriptedConfig {
            snapshots: VecDeque::from(vec![DaemonConfig::default(), polling.clone(), polling]),
            last: DaemonConfig::default(),
        };
        let mut poll = PollLoop::new(source, detectors, RecordingNotifier::default());

        for _ in 0..3 {
            poll.run_once().expect("cycle");
        }
        assert_eq!(
            *used.borrow(),
            vec![DetectionMethod::SessionQuery, DetectionMethod::Polling]
        );
    }

    #[test]
    fn failed_notification_does_not_block_next_transition() {
        let notifier = RecordingNotifier::failing_first(1);
        let mut poll = PollLoop::new(
            config("https://hook.example/send", 1),
            scripted(vec![Ok(true), Ok(false)]),
            notifier.clone(),
        )
        .with_timing(millis());

        poll.run_once().expect("failed delivery is not an iteration error");
        poll.run_once().expect("cycle");

        assert_eq!(notifier.messages().len(), 2);
        assert_eq!(poll.stats().notification_failures, 1);
        assert_eq!(poll.stats().notifications_sent, 1);
        assert!(!poll.tracker().is_locked());
    }

    #[test]
    fn unconfigured_webhook_counts_as_skipped() {
        let mut poll = PollLoop::new(
            config("", 1),
            scripted(vec![Ok(true)]),
            RecordingNotifier::default(),
        );

        poll.run_once().expect("cycle");
        assert_eq!(poll.stats().notifications_skipped, 1);
        assert_eq!(poll.stats().notification_failures, 0);
    }

    #[test]
    fn detector_error_is_an_iteration_error() {
        let mut poll = PollLoop::new(
            config("", 1),
            scripted(vec![Err(())]),
            RecordingNotifier::default(),
        );

        let err = poll.run_once().unwrap_err();
        assert!(matches!(err, IterationError::Detection(_)), "got {err:?}");
        assert_eq!(poll.stats().iteration_errors, 1);
    }

    #[test]
    fn panicking_detector_is_isolated() {
        let mut poll = PollLoop::new(
            config("", 1),
            Detectors::new(|_| Box::new(PanickingDetector) as Box<dyn LockDetector>),
            RecordingNotifier::default(),
        );

        let err = poll.run_once().unwrap_err();
        match err {
            IterationError::Panicked(message) => assert!(message.contains("detector exploded")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn failing_detector_never_halts_loop() {
        let notifier = RecordingNotifier::default();
        let mut poll = PollLoop::new(
            config("https://hook.example/send", 1),
            scripted(vec![Err(())]),
            notifier.clone(),
        )
        .with_timing(millis());
        let handle = poll.stop_handle();

        let controller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            let was_running = handle.is_running();
            handle.request_stop();
            was_running
        });

        let stats = poll.run().expect("loop survives detector failures");
        assert!(controller.join().expect("controller"));
        assert!(stats.iteration_errors >= 1);
        assert_eq!(stats.iteration_errors, stats.iterations);
        assert_eq!(stats.transitions, 0);
        assert!(notifier.messages().is_empty());
        assert_eq!(poll.stop_handle().phase(), RunPhase::Stopped);
    }

    #[test]
    fn failures_back_off_five_units() {
        let mut poll = PollLoop::new(
            config("", 1),
            scripted(vec![Err(())]),
            RecordingNotifier::default(),
        )
        .with_timing(LoopTiming::with_unit(Duration::from_millis(20)));
        let handle = poll.stop_handle();

        let controller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(500));
            handle.request_stop();
        });

        let (stats, logs) = capture(|| poll.run());
        let stats = stats.expect("clean stop");
        controller.join().expect("controller");

        // 20ms stop check + 100ms backoff per failed cycle. Waiting the 1-unit
        // interval instead would allow about a dozen cycles.
        assert!(
            (1..=5).contains(&stats.iterations),
            "iterations: {}",
            stats.iterations
        );
        assert_eq!(stats.iteration_errors, stats.iterations);
        assert!(
            has_event(&logs, "ERROR", "Poll iteration failed; backing off"),
            "logs: {logs:?}"
        );
        assert!(logs.iter().any(|line| line.contains("backoff_ms=100")));
    }

    #[test]
    fn stop_interrupts_a_long_interval() {
        let timing = LoopTiming::with_unit(Duration::from_millis(100));
        let mut poll = PollLoop::new(
            config("", 60),
            scripted(vec![Ok(false)]),
            RecordingNotifier::default(),
        )
        .with_timing(timing);
        let handle = poll.stop_handle();

        let controller = thread::spawn(move || {
            // First stop check is 100ms; by 300ms the loop sits in its 6s interval wait.
            thread::sleep(Duration::from_millis(300));
            handle.request_stop();
        });

        let started = Instant::now();
        let stats = poll.run().expect("clean stop");
        controller.join().expect("controller");

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(stats.iterations, 1);
    }

    #[test]
    fn stop_before_run_exits_without_sampling() {
        let mut poll = PollLoop::new(
            config("", 1),
            scripted(vec![Ok(true)]),
            RecordingNotifier::default(),
        )
        .with_timing(millis());
        poll.stop_handle().request_stop();

        let stats = poll.run().expect("clean stop");
        assert_eq!(stats.iterations, 0);
        assert!(!poll.stop_handle().is_running());
    }
}
