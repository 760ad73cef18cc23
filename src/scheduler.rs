//! Sampling scheduler.
//!
//! Drives the whole detection cycle, one tick at a time:
//! 1. serve any on-demand capture request from the command path
//! 2. run the periodic health check; surface source-down/source-restored
//!    events and reconnect on failure
//! 3. skip perception while detection is disabled
//! 4. skip until the detection interval has elapsed
//! 5. read one frame (log and continue on failure)
//! 6. motion gate: minimum percentage, motion cooldown, dedup cache
//! 7. presence providers: per-provider error isolation, presence cooldown,
//!    the same dedup cache; a confirmed detection makes the next cycle
//!    sample immediately instead of waiting out the idle interval
//!
//! Motion and presence are independent gates — both can fire for the same
//! frame. The dedup cache is consulted once per sampled frame so the second
//! gate shares the first gate's verdict instead of suppressing against it.
//!
//! The tick period is the responsiveness floor and is independent of the
//! detection interval. A `ConnectionLost` anywhere stops the engine; every
//! other failure is logged and survived.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::alert::{
    encode_jpeg, now_epoch_s, Alert, AlertCategory, AlertDeduplicator, AlertDispatcher,
    AlertMetadata,
};
use crate::clock::Clock;
use crate::control::ControlState;
use crate::detect::{Detection, MotionDifferencer, PerceptionProvider};
use crate::error::SourceError;
use crate::frame::Frame;
use crate::source::{LiveSource, SourceStatus};

/// Scheduler timing and gating knobs.
#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    /// Tick period; the responsiveness floor.
    pub tick: Duration,
    /// Minimum interval between detection attempts.
    pub detection_interval: Duration,
    /// Cadence of the source health check.
    pub health_check_interval: Duration,
    /// Minimum interval between motion alerts.
    pub motion_cooldown: Duration,
    /// Motion below this share of the frame is not alert-worthy.
    pub min_motion_percentage: f32,
    /// Minimum interval between presence alerts.
    pub presence_cooldown: Duration,
    /// Suppression window for near-duplicate alert frames.
    pub duplicate_threshold: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            detection_interval: Duration::from_secs(1),
            health_check_interval: Duration::from_secs(30),
            motion_cooldown: Duration::from_secs(5),
            min_motion_percentage: 2.0,
            presence_cooldown: Duration::from_secs(10),
            duplicate_threshold: Duration::from_secs(5),
        }
    }
}

/// Counters shared with the command path via `ControlState`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct EngineStats {
    pub frames_read: u64,
    pub read_failures: u64,
    pub motion_alerts: u64,
    pub presence_alerts: u64,
    pub suppressed_duplicates: u64,
    pub provider_failures: u64,
    pub dispatch_failures: u64,
    pub reconnects: u64,
}

/// Tick-driven detection cycle for one live source.
pub struct SamplingScheduler {
    config: SchedulerConfig,
    source: LiveSource,
    motion: Option<MotionDifferencer>,
    providers: Vec<Box<dyn PerceptionProvider>>,
    dispatcher: Box<dyn AlertDispatcher>,
    dedup: AlertDeduplicator,
    clock: Arc<dyn Clock>,
    control: Arc<ControlState>,
    last_detection: Option<Duration>,
    last_motion_alert: Option<Duration>,
    last_presence_alert: Option<Duration>,
    last_health_check: Option<Duration>,
    seen_generation: u64,
}

impl SamplingScheduler {
    pub fn new(
        config: SchedulerConfig,
        source: LiveSource,
        motion: Option<MotionDifferencer>,
        providers: Vec<Box<dyn PerceptionProvider>>,
        dispatcher: Box<dyn AlertDispatcher>,
        clock: Arc<dyn Clock>,
        control: Arc<ControlState>,
    ) -> Self {
        let dedup = AlertDeduplicator::new(config.duplicate_threshold);
        let seen_generation = source.generation();
        let last_health_check = Some(clock.now());
        control.set_source_properties(source.properties());
        Self {
            config,
            source,
            motion,
            providers,
            dispatcher,
            dedup,
            clock,
            control,
            last_detection: None,
            last_motion_alert: None,
            last_presence_alert: None,
            last_health_check,
            seen_generation,
        }
    }

    /// Run ticks until shutdown. The source handle is released on every exit
    /// path, including the fatal one.
    pub fn run(&mut self) -> Result<(), SourceError> {
        log::info!("engine loop started (tick {:?})", self.config.tick);
        while !self.control.shutdown_requested() {
            match self.tick() {
                Ok(()) => {}
                Err(SourceError::Aborted) => break,
                Err(err) => {
                    self.source.release();
                    self.control.set_source_status(self.source.status());
                    return Err(err);
                }
            }
            self.clock.sleep(self.config.tick);
        }
        self.source.release();
        self.control.set_source_status(self.source.status());
        log::info!("engine loop stopped");
        Ok(())
    }

    /// One cycle. `Err` is returned only for fatal conditions
    /// (`ConnectionLost`, `Aborted`); everything else is absorbed.
    pub fn tick(&mut self) -> Result<(), SourceError> {
        if self.source.status() == SourceStatus::Failed {
            return Err(SourceError::ConnectionLost {
                attempts: self.source.max_reconnect_attempts(),
            });
        }

        let now = self.clock.now();

        self.serve_capture_request()?;

        if self.health_check_due(now) {
            self.last_health_check = Some(now);
            self.run_health_check()?;
        }

        self.control.set_source_status(self.source.status());

        if !self.control.detection_enabled() {
            return Ok(());
        }

        if !self.detection_due(now) {
            return Ok(());
        }
        self.last_detection = Some(now);

        let frame = match self.source.read() {
            Ok(frame) => frame,
            Err(err @ (SourceError::ConnectionLost { .. } | SourceError::Aborted)) => {
                return Err(err)
            }
            Err(err) => {
                log::warn!("sampling read failed: {}", err);
                self.control.with_stats(|s| s.read_failures += 1);
                return Ok(());
            }
        };
        self.control.with_stats(|s| s.frames_read += 1);

        // A reconnect happened since the last sampled frame: frame-to-frame
        // continuity is broken, so the motion baseline must restart.
        if self.source.generation() != self.seen_generation {
            self.seen_generation = self.source.generation();
            if let Some(motion) = &mut self.motion {
                motion.reset();
            }
        }

        let motion_result = self.motion.as_mut().map(|m| m.detect(&frame));
        let detections = self.run_providers(&frame);

        // One dedup consult per sampled frame, shared by both gates.
        let mut frame_verdict: Option<bool> = None;

        if let Some(result) = motion_result {
            if result.has_motion
                && result.percentage >= self.config.min_motion_percentage
                && elapsed(self.last_motion_alert, self.config.motion_cooldown, now)
            {
                if self.consult_dedup(&frame, now, &mut frame_verdict) {
                    self.control.with_stats(|s| s.suppressed_duplicates += 1);
                } else {
                    let message = format!(
                        "Motion detected ({:.1}% of frame, {} region(s))",
                        result.percentage,
                        result.regions.len()
                    );
                    let metadata = AlertMetadata {
                        category: AlertCategory::Motion,
                        epoch_s: now_epoch_s(),
                        message,
                        motion_percentage: Some(result.percentage),
                        detections: Vec::new(),
                        identities: Vec::new(),
                    };
                    self.dispatch(metadata, Some(&frame));
                    self.last_motion_alert = Some(now);
                }
            }
        }

        if !detections.is_empty() {
            if elapsed(self.last_presence_alert, self.config.presence_cooldown, now) {
                if self.consult_dedup(&frame, now, &mut frame_verdict) {
                    self.control.with_stats(|s| s.suppressed_duplicates += 1);
                } else {
                    let identities: Vec<String> = detections
                        .iter()
                        .filter(|d| d.label != "person")
                        .map(|d| d.label.clone())
                        .collect();
                    let labels: Vec<&str> =
                        detections.iter().map(|d| d.label.as_str()).collect();
                    let metadata = AlertMetadata {
                        category: AlertCategory::Presence,
                        epoch_s: now_epoch_s(),
                        message: format!(
                            "{} detection(s): {}",
                            detections.len(),
                            labels.join(", ")
                        ),
                        motion_percentage: None,
                        detections,
                        identities,
                    };
                    self.dispatch(metadata, Some(&frame));
                    self.last_presence_alert = Some(now);
                }
            }
            // A live event takes priority over the idle cadence: sample
            // again on the very next tick.
            self.last_detection = None;
        }

        Ok(())
    }

    fn run_providers(&mut self, frame: &Frame) -> Vec<Detection> {
        let mut detections = Vec::new();
        let mut failures = 0u64;
        for provider in &mut self.providers {
            match provider.detect(frame) {
                Ok(found) => detections.extend(found),
                Err(err) => {
                    failures += 1;
                    log::warn!(
                        "perception provider '{}' failed: {}",
                        provider.name(),
                        err
                    );
                }
            }
        }
        if failures > 0 {
            self.control.with_stats(|s| s.provider_failures += failures);
        }
        detections
    }

    fn run_health_check(&mut self) -> Result<(), SourceError> {
        match self.source.health_check() {
            Ok(()) => Ok(()),
            Err(err) => {
                log::warn!("health check failed: {}", err);
                self.emit_status_alert(
                    AlertCategory::SourceDown,
                    format!("source unhealthy: {err}"),
                );
                let max_attempts = self.source.max_reconnect_attempts();
                match self.source.reconnect(max_attempts) {
                    Ok(()) => {
                        self.control.with_stats(|s| s.reconnects += 1);
                        self.emit_status_alert(
                            AlertCategory::SourceRestored,
                            "source reconnected".to_string(),
                        );
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    fn serve_capture_request(&mut self) -> Result<(), SourceError> {
        if !self.control.take_capture_request() {
            return Ok(());
        }
        match self.source.read() {
            Ok(frame) => match encode_jpeg(&frame) {
                Ok(jpeg) => {
                    log::info!("on-demand capture stored ({} bytes)", jpeg.len());
                    self.control.store_snapshot(jpeg);
                }
                Err(err) => log::warn!("on-demand capture encode failed: {}", err),
            },
            Err(err @ (SourceError::ConnectionLost { .. } | SourceError::Aborted)) => {
                return Err(err)
            }
            Err(err) => log::warn!("on-demand capture failed: {}", err),
        }
        Ok(())
    }

    fn consult_dedup(
        &mut self,
        frame: &Frame,
        now: Duration,
        verdict: &mut Option<bool>,
    ) -> bool {
        if let Some(v) = *verdict {
            return v;
        }
        let v = self.dedup.should_suppress(frame, now);
        *verdict = Some(v);
        v
    }

    fn dispatch(&mut self, metadata: AlertMetadata, frame: Option<&Frame>) {
        let category = metadata.category;
        let alert = Alert { metadata, frame };
        match self.dispatcher.send(&alert) {
            Ok(()) => self.control.with_stats(|s| match category {
                AlertCategory::Motion => s.motion_alerts += 1,
                AlertCategory::Presence => s.presence_alerts += 1,
                _ => {}
            }),
            Err(err) => {
                // No synchronous retry, and the dedup entry stays: the next
                // qualifying cycle is the retry.
                log::warn!("alert dispatch failed ({:?}): {}", category, err);
                self.control.with_stats(|s| s.dispatch_failures += 1);
            }
        }
    }

    fn emit_status_alert(&mut self, category: AlertCategory, message: String) {
        self.dispatch(AlertMetadata::status(category, message), None);
    }

    fn health_check_due(&self, now: Duration) -> bool {
        elapsed(self.last_health_check, self.config.health_check_interval, now)
    }

    fn detection_due(&self, now: Duration) -> bool {
        elapsed(self.last_detection, self.config.detection_interval, now)
    }
}

fn elapsed(last: Option<Duration>, interval: Duration, now: Duration) -> bool {
    match last {
        Some(at) => now.saturating_sub(at) >= interval,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::detect::{BoundingBox, Detection, MotionConfig};
    use crate::source::{CameraScript, ScriptedCamera};
    use anyhow::anyhow;
    use std::sync::Mutex;

    struct CollectingDispatcher {
        sent: Arc<Mutex<Vec<AlertCategory>>>,
        fail: bool,
    }

    impl AlertDispatcher for CollectingDispatcher {
        fn send(&mut self, alert: &Alert<'_>) -> anyhow::Result<()> {
            if self.fail {
                return Err(anyhow!("dispatch unavailable"));
            }
            self.sent
                .lock()
                .unwrap()
                .push(alert.metadata.category);
            Ok(())
        }
    }

    struct FailingProvider;

    impl PerceptionProvider for FailingProvider {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _frame: &Frame) -> anyhow::Result<Vec<Detection>> {
            Err(anyhow!("model crashed"))
        }
    }

    struct AlwaysProvider;

    impl PerceptionProvider for AlwaysProvider {
        fn name(&self) -> &'static str {
            "always"
        }

        fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<Detection>> {
            Ok(vec![Detection {
                bounds: BoundingBox {
                    x: 0,
                    y: 0,
                    width: frame.width,
                    height: frame.height,
                },
                score: 0.95,
                label: "person".to_string(),
            }])
        }
    }

    struct Rig {
        scheduler: SamplingScheduler,
        script: Arc<CameraScript>,
        clock: Arc<ManualClock>,
        control: Arc<ControlState>,
        sent: Arc<Mutex<Vec<AlertCategory>>>,
    }

    fn build_rig(
        config: SchedulerConfig,
        motion: Option<MotionDifferencer>,
        providers: Vec<Box<dyn PerceptionProvider>>,
    ) -> Rig {
        let script = Arc::new(CameraScript::default());
        let clock = Arc::new(ManualClock::new());
        let control = Arc::new(ControlState::new(true));
        let mut source = LiveSource::new(
            Box::new(ScriptedCamera::new(script.clone(), 80, 60, 10)),
            5,
            clock.clone(),
            control.shutdown_flag(),
        );
        source.connect().unwrap();

        let sent = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = CollectingDispatcher {
            sent: sent.clone(),
            fail: false,
        };
        let scheduler = SamplingScheduler::new(
            config,
            source,
            motion,
            providers,
            Box::new(dispatcher),
            clock.clone(),
            control.clone(),
        );
        Rig {
            scheduler,
            script,
            clock,
            control,
            sent,
        }
    }

    fn sharp_motion() -> Option<MotionDifferencer> {
        Some(MotionDifferencer::new(MotionConfig {
            blur_radius: 0,
            ..MotionConfig::default()
        }))
    }

    #[test]
    fn detection_interval_gates_perception() {
        let config = SchedulerConfig {
            detection_interval: Duration::from_secs(2),
            ..SchedulerConfig::default()
        };
        let mut rig = build_rig(config, None, vec![]);
        let probe_reads = rig.script.reads();

        // Two attempts one second apart: one perception invocation.
        rig.scheduler.tick().unwrap();
        rig.clock.advance(Duration::from_secs(1));
        rig.scheduler.tick().unwrap();
        assert_eq!(rig.script.reads(), probe_reads + 1);

        // A third attempt two seconds later samples again.
        rig.clock.advance(Duration::from_secs(2));
        rig.scheduler.tick().unwrap();
        assert_eq!(rig.script.reads(), probe_reads + 2);
    }

    #[test]
    fn disabled_detection_skips_sampling() {
        let mut rig = build_rig(SchedulerConfig::default(), None, vec![]);
        let probe_reads = rig.script.reads();

        rig.control.set_detection_enabled(false);
        for _ in 0..5 {
            rig.scheduler.tick().unwrap();
            rig.clock.advance(Duration::from_secs(1));
        }
        assert_eq!(rig.script.reads(), probe_reads);

        rig.control.set_detection_enabled(true);
        rig.scheduler.tick().unwrap();
        assert_eq!(rig.script.reads(), probe_reads + 1);
    }

    #[test]
    fn motion_alert_respects_cooldown_and_dedup() {
        let config = SchedulerConfig {
            detection_interval: Duration::from_secs(1),
            motion_cooldown: Duration::from_secs(5),
            // Wider than the cooldown so a repeat that clears the cooldown
            // can still be a duplicate.
            duplicate_threshold: Duration::from_secs(10),
            min_motion_percentage: 2.0,
            ..SchedulerConfig::default()
        };
        let mut rig = build_rig(config, sharp_motion(), vec![]);

        // Baseline frame.
        rig.scheduler.tick().unwrap();
        assert!(rig.sent.lock().unwrap().is_empty());

        // Scene change: 600 changed pixels = 12.5% of an 80x60 frame.
        rig.script.set_scene(200);
        rig.clock.advance(Duration::from_secs(1));
        rig.scheduler.tick().unwrap();
        assert_eq!(
            rig.sent.lock().unwrap().as_slice(),
            &[AlertCategory::Motion]
        );

        // Another change one second later is inside the motion cooldown.
        rig.script.set_scene(0);
        rig.clock.advance(Duration::from_secs(1));
        rig.scheduler.tick().unwrap();
        assert_eq!(rig.sent.lock().unwrap().len(), 1);

        // Past the cooldown, but the scene now matches the fingerprint
        // recorded at the first alert: dedup suppresses it.
        rig.script.set_scene(200);
        rig.clock.advance(Duration::from_secs(4));
        rig.scheduler.tick().unwrap();
        assert_eq!(rig.sent.lock().unwrap().len(), 1);
        assert_eq!(rig.control.stats_snapshot().suppressed_duplicates, 1);
    }

    #[test]
    fn provider_failure_does_not_block_others() {
        let config = SchedulerConfig::default();
        let mut rig = build_rig(
            config,
            None,
            vec![Box::new(FailingProvider), Box::new(AlwaysProvider)],
        );

        rig.scheduler.tick().unwrap();

        assert_eq!(
            rig.sent.lock().unwrap().as_slice(),
            &[AlertCategory::Presence]
        );
        let stats = rig.control.stats_snapshot();
        assert_eq!(stats.provider_failures, 1);
        assert_eq!(stats.presence_alerts, 1);
    }

    #[test]
    fn confirmed_detection_resamples_on_the_next_tick() {
        let config = SchedulerConfig {
            detection_interval: Duration::from_secs(5),
            presence_cooldown: Duration::from_secs(60),
            ..SchedulerConfig::default()
        };
        let mut rig = build_rig(config, None, vec![Box::new(AlwaysProvider)]);
        let probe_reads = rig.script.reads();

        rig.scheduler.tick().unwrap();
        assert_eq!(rig.script.reads(), probe_reads + 1);

        // 100ms later, far inside the idle interval, but the confirmed
        // detection cleared the timer.
        rig.clock.advance(Duration::from_millis(100));
        rig.scheduler.tick().unwrap();
        assert_eq!(rig.script.reads(), probe_reads + 2);
    }

    #[test]
    fn health_check_failure_reports_down_and_restored() {
        let config = SchedulerConfig {
            health_check_interval: Duration::from_secs(30),
            ..SchedulerConfig::default()
        };
        let mut rig = build_rig(config, None, vec![]);
        rig.control.set_detection_enabled(false);

        // Inside the interval: no probe.
        rig.scheduler.tick().unwrap();

        // Health probe fails once; reconnect succeeds on the first attempt.
        rig.script.fail_next_reads(1);
        rig.clock.advance(Duration::from_secs(30));
        rig.scheduler.tick().unwrap();

        assert_eq!(
            rig.sent.lock().unwrap().as_slice(),
            &[AlertCategory::SourceDown, AlertCategory::SourceRestored]
        );
        assert_eq!(rig.control.stats_snapshot().reconnects, 1);
        assert_eq!(rig.script.connects(), 2);
    }

    #[test]
    fn dispatch_failure_is_counted_and_survived() {
        let script = Arc::new(CameraScript::default());
        let clock = Arc::new(ManualClock::new());
        let control = Arc::new(ControlState::new(true));
        let mut source = LiveSource::new(
            Box::new(ScriptedCamera::new(script.clone(), 80, 60, 10)),
            5,
            clock.clone(),
            control.shutdown_flag(),
        );
        source.connect().unwrap();

        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = SamplingScheduler::new(
            SchedulerConfig::default(),
            source,
            None,
            vec![Box::new(AlwaysProvider)],
            Box::new(CollectingDispatcher {
                sent: sent.clone(),
                fail: true,
            }),
            clock,
            control.clone(),
        );

        scheduler.tick().unwrap();

        assert!(sent.lock().unwrap().is_empty());
        let stats = control.stats_snapshot();
        assert_eq!(stats.dispatch_failures, 1);
        assert_eq!(stats.presence_alerts, 0);
    }

    #[test]
    fn capture_request_is_served_before_the_gates() {
        let mut rig = build_rig(SchedulerConfig::default(), None, vec![]);
        rig.control.set_detection_enabled(false);

        rig.control.request_capture();
        rig.scheduler.tick().unwrap();

        let snapshot = rig.control.latest_snapshot().expect("snapshot stored");
        assert_eq!(&snapshot[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn baseline_resets_after_a_reconnect() {
        let config = SchedulerConfig {
            detection_interval: Duration::from_secs(1),
            ..SchedulerConfig::default()
        };
        let mut rig = build_rig(config, sharp_motion(), vec![]);

        // Establish a baseline on the black scene.
        rig.scheduler.tick().unwrap();

        // Change the scene while the source drops out; the read escalation
        // reconnects underneath the scheduler.
        rig.script.set_scene(200);
        rig.script.fail_next_reads(3);
        for _ in 0..3 {
            rig.clock.advance(Duration::from_secs(1));
            rig.scheduler.tick().unwrap();
        }
        assert_eq!(rig.script.connects(), 2);

        // First frame after the reconnect re-baselines instead of alerting,
        // even though it differs from the pre-disconnect baseline.
        rig.clock.advance(Duration::from_secs(1));
        rig.scheduler.tick().unwrap();
        assert!(rig.sent.lock().unwrap().is_empty());

        // Motion is detected again on the following change.
        rig.script.set_scene(100);
        rig.clock.advance(Duration::from_secs(5));
        rig.scheduler.tick().unwrap();
        assert_eq!(
            rig.sent.lock().unwrap().as_slice(),
            &[AlertCategory::Motion]
        );
    }

    #[test]
    fn exhausted_source_stops_the_engine() {
        let script = Arc::new(CameraScript::default());
        let clock = Arc::new(ManualClock::new());
        let control = Arc::new(ControlState::new(true));
        let mut source = LiveSource::new(
            Box::new(ScriptedCamera::new(script.clone(), 80, 60, 10)),
            2,
            clock.clone(),
            control.shutdown_flag(),
        );
        source.connect().unwrap();

        let mut scheduler = SamplingScheduler::new(
            SchedulerConfig::default(),
            source,
            None,
            vec![],
            Box::new(CollectingDispatcher {
                sent: Arc::new(Mutex::new(Vec::new())),
                fail: false,
            }),
            clock.clone(),
            control,
        );

        script.fail_next_connects(2);
        script.fail_next_reads(3);
        assert!(scheduler.tick().is_ok());
        clock.advance(Duration::from_secs(1));
        assert!(scheduler.tick().is_ok());
        clock.advance(Duration::from_secs(1));
        let err = scheduler.tick().unwrap_err();
        assert!(matches!(err, SourceError::ConnectionLost { .. }));

        // Subsequent ticks stay fatal.
        assert!(matches!(
            scheduler.tick(),
            Err(SourceError::ConnectionLost { .. })
        ));
    }
}
