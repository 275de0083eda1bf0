//! Session orchestration.
//!
//! [`SessionController`] owns the live session and every timer around it. Key
//! presses are applied locally right away and forwarded to the scorer without
//! waiting; scorer replies come back through [`SessionController::pump`] and
//! are folded into a throttled authoritative view. The UI only reads from the
//! controller, it never mutates session state directly.

use chrono::Local;
use tracing::{debug, info, warn};

use crate::broadcast::{DuelProgressMessage, OpponentProgress, ProgressBroadcaster};
use crate::clock::Clock;
use crate::config::EngineSettings;
use crate::error::Result;
use crate::idle::IdlePauseDetector;
use crate::keystroke::{KeyInput, KeyOutcome, KeystrokeProcessor};
use crate::metrics::{LocalTally, MetricsSnapshot};
use crate::mission::{MissionConfig, MissionEvaluator, MissionState};
use crate::persistence::{AttemptRecord, AttemptSink};
use crate::replay::{ReplayFrame, ReplayPlayer, ReplayRecorder};
use crate::scheduler::{Fired, Scheduler, TimerKind};
use crate::scoring::{ScoreReply, Scorer, ScoringPipeline};
use crate::session::{Session, SessionStatus};
use crate::time_series::TimeSeriesPoint;

/// Summary of a finished session, available once it is finalized.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionReport {
    pub session_id: String,
    /// Net WPM from local keystroke accounting.
    pub net_wpm: f64,
    pub raw_wpm: f64,
    /// Authoritative figures, or the local fallback when the scorer never
    /// answered the final keystroke.
    pub metrics: MetricsSnapshot,
    pub authoritative: bool,
    pub active_ms: u64,
    pub total_keystrokes: u64,
    pub total_errors: u64,
    pub mission: MissionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finalization {
    NotDue,
    /// Completed locally, waiting for the final scorer reply.
    Awaiting,
    Done,
}

/// Latest scorer answer versus what observers currently see.
#[derive(Debug, Default)]
struct AuthoritativeView {
    latest: Option<MetricsSnapshot>,
    latest_seq: u64,
    exposed: MetricsSnapshot,
    last_exposed_at: Option<u64>,
    pending: bool,
    final_snapshot: Option<MetricsSnapshot>,
}

pub struct SessionController<C: Clock> {
    clock: C,
    settings: EngineSettings,
    scheduler: Scheduler,
    idle: IdlePauseDetector,
    processor: KeystrokeProcessor,
    session: Session,
    recorder: ReplayRecorder,
    ghost_log: Option<Vec<ReplayFrame>>,
    ghost: Option<ReplayPlayer>,
    scoring: ScoringPipeline,
    mission: MissionEvaluator,
    broadcaster: Option<ProgressBroadcaster>,
    sink: Option<Box<dyn AttemptSink>>,
    view: AuthoritativeView,
    samples: Vec<TimeSeriesPoint>,
    next_generation: u64,
    finalization: Finalization,
    report: Option<CompletionReport>,
    show_result: bool,
}

impl<C: Clock> std::fmt::Debug for SessionController<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("generation", &self.session.generation)
            .field("status", &self.session.status)
            .field("mission", &self.mission.state())
            .field("scoring", &self.scoring)
            .finish()
    }
}

impl<C: Clock> SessionController<C> {
    pub fn new<S: Scorer>(clock: C, scorer: S, settings: EngineSettings) -> Self {
        Self {
            clock,
            settings,
            scheduler: Scheduler::new(),
            idle: IdlePauseDetector::new(settings.idle_timeout_ms),
            processor: KeystrokeProcessor::new(),
            session: Session::default(),
            recorder: ReplayRecorder::new(),
            ghost_log: None,
            ghost: None,
            scoring: ScoringPipeline::new(scorer, settings.dispatch),
            mission: MissionEvaluator::new(),
            broadcaster: None,
            sink: None,
            view: AuthoritativeView::default(),
            samples: Vec::new(),
            next_generation: 0,
            finalization: Finalization::NotDue,
            report: None,
            show_result: false,
        }
    }

    /// Attaches the attempt sink and lets it catch up with remote state.
    pub fn with_sink(mut self, mut sink: Box<dyn AttemptSink>) -> Self {
        if let Err(e) = sink.pull_from_cloud() {
            warn!("could not pull attempt history: {}", e);
        }
        self.sink = Some(sink);
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: ProgressBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn leave_race(&mut self) {
        self.broadcaster = None;
        self.scheduler.cancel_kind(TimerKind::Frame);
    }

    /// Discards any previous session and starts a fresh one.
    pub fn start_lesson(&mut self, text: &str, ghost: Option<Vec<ReplayFrame>>) {
        let now = self.clock.now_ms();
        self.scheduler.cancel_all();
        self.next_generation += 1;

        self.session = Session::new(text, self.next_generation, now);
        self.recorder.clear();
        self.processor.reset();
        self.samples.clear();
        self.view = AuthoritativeView::default();
        self.finalization = Finalization::NotDue;
        self.report = None;
        self.show_result = false;

        self.ghost_log = ghost;
        self.ghost = self
            .ghost_log
            .clone()
            .filter(|log| !log.is_empty())
            .map(|log| {
                let mut player = ReplayPlayer::new(log);
                player.restart(0);
                player
            });

        self.scoring.start_session(text);
        if let Some(b) = self.broadcaster.as_mut() {
            b.reset();
        }

        self.idle.arm(&mut self.scheduler, now);
        self.scheduler
            .arm_interval(TimerKind::Sample, now, self.settings.sample_interval_ms);
        self.sync_frame_loop(now);

        info!(
            generation = self.session.generation,
            chars = self.session.target.len(),
            ghost = self.ghost.is_some(),
            "session started"
        );
    }

    /// Restarts the last lesson text against the same ghost. A finished
    /// mission is flown again with the same configuration.
    pub fn retry_lesson(&mut self) -> bool {
        if self.session.target.is_empty() {
            return false;
        }
        if self.mission.redeploy() {
            info!("mission redeployed for retry");
        }
        let text = self.session.target_text();
        let ghost = self.ghost_log.clone();
        self.start_lesson(&text, ghost);
        true
    }

    pub fn brief_mission(&mut self, config: MissionConfig) -> Result<()> {
        self.mission.brief(config)
    }

    pub fn deploy_mission(&mut self) -> Result<()> {
        self.mission.deploy()
    }

    pub fn reset_mission(&mut self) {
        self.mission.reset();
    }

    pub fn on_key_down(&mut self, key: KeyInput) -> KeyOutcome {
        let now = self.clock.now_ms();
        self.drain_replies(now);
        self.run_timers(now);

        if !self.session.is_live() {
            debug!(status = %self.session.status, ?key, "key ignored");
            return KeyOutcome::Ignored;
        }
        if matches!(key, KeyInput::Other) {
            return KeyOutcome::Ignored;
        }
        if self.idle.resume(&mut self.session, now) {
            // the key may change nothing, the session still needs a watchdog
            self.idle.arm(&mut self.scheduler, now);
            self.scheduler
                .arm_interval(TimerKind::Sample, now, self.settings.sample_interval_ms);
            self.sync_frame_loop(now);
        }

        let outcome = self.processor.process(
            &mut self.session,
            &mut self.recorder,
            &mut self.mission,
            key,
            now,
        );

        match outcome {
            KeyOutcome::Ignored => {}
            KeyOutcome::Erased { .. } => {
                self.idle.arm(&mut self.scheduler, now);
                if self.session.input.is_empty() {
                    self.restart_ghost(now);
                }
            }
            KeyOutcome::BackspaceRejected => self.abort(now),
            KeyOutcome::Accepted { job, completes, .. } => {
                self.idle.arm(&mut self.scheduler, now);
                self.scoring.submit(job);
                if matches!(self.mission.state(), MissionState::Failed(_)) {
                    self.abort(now);
                } else if completes {
                    self.complete(now);
                }
            }
        }

        self.drain_replies(now);
        outcome
    }

    /// Drives timers and collects asynchronous results. Call once per frame.
    pub fn on_tick(&mut self) {
        let now = self.clock.now_ms();
        self.drain_replies(now);
        self.run_timers(now);
        if let Some(b) = self.broadcaster.as_mut() {
            b.poll();
        }
    }

    /// Collects pending scorer replies without firing timers.
    pub fn pump(&mut self) {
        let now = self.clock.now_ms();
        self.drain_replies(now);
    }

    /// Folds one scorer reply into the authoritative view.
    pub fn receive_score(&mut self, reply: ScoreReply) {
        let now = self.clock.now_ms();
        self.apply_reply(reply, now);
    }

    /// Cancels every timer. A completion still waiting on its final score
    /// is finalized with what is known now; later replies are discarded.
    pub fn shutdown(&mut self) {
        self.scheduler.cancel_all();
        if self.finalization == Finalization::Awaiting {
            self.finalize(self.clock.now_ms());
        }
        self.finalization = Finalization::Done;
        debug!(generation = self.session.generation, "controller shut down");
    }

    fn drain_replies(&mut self, now: u64) {
        for reply in self.scoring.drain() {
            self.apply_reply(reply, now);
        }
    }

    fn apply_reply(&mut self, reply: ScoreReply, now: u64) {
        if reply.generation != self.session.generation {
            debug!(
                reply = reply.generation,
                current = self.session.generation,
                "dropping score for a discarded session"
            );
            return;
        }
        if self.finalization == Finalization::Done {
            return;
        }

        let snapshot = match reply.result {
            Ok(snapshot) => snapshot.sanitized(),
            Err(e) => {
                warn!(seq = reply.seq, "scorer failed: {}", e);
                if reply.is_final {
                    self.finalize(now);
                }
                return;
            }
        };

        if reply.is_final {
            self.view.latest_seq = reply.seq;
            self.view.latest = Some(snapshot.clone());
            self.view.final_snapshot = Some(snapshot);
            self.finalize(now);
            return;
        }
        if reply.seq <= self.view.latest_seq {
            debug!(
                seq = reply.seq,
                latest = self.view.latest_seq,
                "dropping out-of-order score"
            );
            return;
        }
        self.view.latest_seq = reply.seq;
        self.view.latest = Some(snapshot);
        self.view.pending = true;

        if !self.session.is_live() {
            return;
        }
        let window_open = self
            .view
            .last_exposed_at
            .map_or(true, |last| {
                now.saturating_sub(last) >= self.settings.metrics_throttle_ms
            });
        if window_open {
            self.expose(now);
        } else if !self.scheduler.is_armed(TimerKind::MetricsFlush) {
            let last = self.view.last_exposed_at.unwrap_or(now);
            let due = last + self.settings.metrics_throttle_ms;
            self.scheduler
                .arm(TimerKind::MetricsFlush, now, due.saturating_sub(now));
        }
    }

    fn expose(&mut self, now: u64) {
        let Some(latest) = self.view.latest.clone() else {
            return;
        };
        self.view.exposed = latest;
        self.view.pending = false;
        self.view.last_exposed_at = Some(now);

        if self.mission.evaluate_metrics(&self.view.exposed) {
            self.abort(now);
            return;
        }
        let msg = DuelProgressMessage::from_session(&self.session, &self.view.exposed);
        if let Some(b) = self.broadcaster.as_mut() {
            b.on_tick(now, msg);
        }
    }

    fn run_timers(&mut self, now: u64) {
        let mut fired = self.scheduler.poll_due(now);
        // the pause goes first so nothing else runs past the idle deadline
        fired.sort_by_key(|f| f.kind != TimerKind::IdlePause);

        for Fired { kind, due_at } in fired {
            match kind {
                TimerKind::IdlePause => {
                    // pause from when the timer was due, not when it was noticed
                    if self.idle.on_timeout(&mut self.session, due_at) {
                        self.advance_ghost(now);
                        self.scheduler.cancel_kind(TimerKind::Sample);
                        self.sync_frame_loop(now);
                    }
                }
                TimerKind::Sample => {
                    let before_pause = self
                        .session
                        .pause_started_at_ms
                        .is_some_and(|paused_at| due_at < paused_at);
                    if self.session.status == SessionStatus::Running || before_pause {
                        self.push_sample(due_at);
                    }
                }
                TimerKind::MetricsFlush => {
                    if self.view.pending && self.session.is_live() {
                        self.expose(now);
                    }
                }
                TimerKind::Frame => self.frame(now),
                TimerKind::FinalScoreDeadline => {
                    warn!(
                        generation = self.session.generation,
                        "final score did not arrive in time, using local figures"
                    );
                    self.finalize(now);
                }
            }
        }
    }

    fn frame(&mut self, now: u64) {
        if self.session.status != SessionStatus::Running {
            self.scheduler.cancel_kind(TimerKind::Frame);
            return;
        }
        self.advance_ghost(now);
        let msg = DuelProgressMessage::from_session(&self.session, &self.view.exposed);
        if let Some(b) = self.broadcaster.as_mut() {
            b.on_tick(now, msg);
            b.poll();
        }
    }

    /// Back at the first character: the ghost starts over from here.
    fn restart_ghost(&mut self, now: u64) {
        let active = self.session.active_elapsed_ms(now);
        if let Some(ghost) = self.ghost.as_mut() {
            ghost.restart(active);
            debug!(origin_ms = active, "ghost restarted");
        }
    }

    fn advance_ghost(&mut self, now: u64) {
        let active = self.session.active_elapsed_ms(now);
        if let Some(ghost) = self.ghost.as_mut() {
            ghost.advance(active);
        }
    }

    fn sync_frame_loop(&mut self, now: u64) {
        let wanted = self.session.status == SessionStatus::Running
            && (self.ghost.is_some() || self.broadcaster.is_some());
        if !wanted {
            self.scheduler.cancel_kind(TimerKind::Frame);
        } else if !self.scheduler.is_armed(TimerKind::Frame) {
            self.scheduler
                .arm_interval(TimerKind::Frame, now, self.settings.frame_interval_ms);
        }
    }

    fn push_sample(&mut self, at: u64) {
        let tally = self.session.tally(at);
        self.samples.push(TimeSeriesPoint::new(
            tally.active_ms as f64 / 1000.0,
            tally.net_wpm(),
            tally.raw_wpm(),
        ));
    }

    fn complete(&mut self, now: u64) {
        self.session.status = SessionStatus::Completed;
        self.session.finished_at_ms = Some(now);
        self.scheduler.cancel_all();
        self.push_sample(now);
        self.finalization = Finalization::Awaiting;
        self.scheduler.arm(
            TimerKind::FinalScoreDeadline,
            now,
            self.settings.final_score_grace_ms,
        );
        info!(
            generation = self.session.generation,
            active_ms = self.session.active_elapsed_ms(now),
            "session completed"
        );
    }

    fn abort(&mut self, now: u64) {
        self.session.status = SessionStatus::Aborted;
        self.session.finished_at_ms = Some(now);
        self.scheduler.cancel_all();
        self.finalization = Finalization::Done;
        self.show_result = true;
        info!(
            generation = self.session.generation,
            reason = self.mission.failure_reason().unwrap_or_default(),
            "session aborted"
        );
    }

    fn finalize(&mut self, now: u64) {
        if self.finalization != Finalization::Awaiting {
            return;
        }
        self.finalization = Finalization::Done;
        self.scheduler.cancel_kind(TimerKind::FinalScoreDeadline);

        let tally = self.session.tally(now);
        let authoritative = self.view.final_snapshot.is_some();
        let metrics = self
            .view
            .final_snapshot
            .take()
            .unwrap_or_else(|| tally.to_snapshot());
        self.view.exposed = metrics.clone();
        self.view.pending = false;
        self.view.last_exposed_at = Some(now);

        if (tally.net_wpm() - metrics.adjusted_wpm).abs() > 10.0 {
            debug!(
                local = tally.net_wpm(),
                scorer = metrics.adjusted_wpm,
                "local and authoritative speed disagree"
            );
        }

        if !self.mission.evaluate_metrics(&metrics) {
            self.mission
                .evaluate_completion(tally.net_wpm(), metrics.accuracy);
        }

        let msg = DuelProgressMessage::from_session(&self.session, &metrics);
        if let Some(b) = self.broadcaster.as_mut() {
            b.finish(now, msg);
        }

        let session_id = format!(
            "{}-{}",
            Local::now().format("%Y%m%d%H%M%S"),
            self.session.generation
        );
        let report = CompletionReport {
            session_id,
            net_wpm: tally.net_wpm(),
            raw_wpm: tally.raw_wpm(),
            metrics,
            authoritative,
            active_ms: tally.active_ms,
            total_keystrokes: tally.keystrokes,
            total_errors: tally.errors,
            mission: self.mission.state().clone(),
        };
        self.persist(&report);
        self.report = Some(report);
        self.show_result = true;
    }

    fn persist(&mut self, report: &CompletionReport) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let mission = match &report.mission {
            MissionState::Succeeded => Some("succeeded".to_string()),
            MissionState::Failed(reason) => Some(reason.clone()),
            _ => None,
        };
        let attempt = AttemptRecord {
            session_id: report.session_id.clone(),
            text: self.session.target_text(),
            wpm: report.metrics.adjusted_wpm,
            raw_wpm: report.metrics.raw_wpm,
            accuracy: report.metrics.accuracy,
            consistency: report.metrics.consistency,
            duration_ms: report.active_ms,
            total_keystrokes: report.total_keystrokes,
            errors_by_char: self.session.errors_by_target_char.clone(),
            graph_samples: self.samples.clone(),
            replay: self.recorder.frames().to_vec(),
            mission,
            recorded_at: Local::now(),
        };
        if let Err(e) = sink.record_attempt(&attempt) {
            warn!(session = %attempt.session_id, "failed to record attempt: {}", e);
            return;
        }
        if let Err(e) = sink.push_to_cloud() {
            warn!(session = %attempt.session_id, "sync failed: {}", e);
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Throttled, sanitized authoritative metrics.
    pub fn metrics(&self) -> &MetricsSnapshot {
        &self.view.exposed
    }

    pub fn local_tally(&self) -> LocalTally {
        self.session.tally(self.clock.now_ms())
    }

    pub fn input(&self) -> &[char] {
        &self.session.input
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status
    }

    pub fn is_paused(&self) -> bool {
        self.session.status == SessionStatus::Paused
    }

    pub fn show_result(&self) -> bool {
        self.show_result
    }

    pub fn dismiss_result(&mut self) {
        self.show_result = false;
    }

    pub fn mission_state(&self) -> &MissionState {
        self.mission.state()
    }

    pub fn mission_config(&self) -> Option<&MissionConfig> {
        self.mission.config()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.mission.failure_reason()
    }

    pub fn ghost_cursor(&self) -> Option<usize> {
        self.ghost.as_ref().map(ReplayPlayer::cursor)
    }

    pub fn opponents(&self) -> &[OpponentProgress] {
        self.broadcaster
            .as_ref()
            .map(|b| b.opponents())
            .unwrap_or(&[])
    }

    pub fn in_race(&self) -> bool {
        self.broadcaster.is_some()
    }

    pub fn graph_samples(&self) -> &[TimeSeriesPoint] {
        &self.samples
    }

    pub fn report(&self) -> Option<&CompletionReport> {
        self.report.as_ref()
    }

    pub fn replay_log(&self) -> &[ReplayFrame] {
        self.recorder.frames()
    }
}

impl<C: Clock> Drop for SessionController<C> {
    fn drop(&mut self) {
        self.scheduler.cancel_all();
    }
}
