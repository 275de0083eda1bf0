//! Authoritative scoring path.
//!
//! Every accepted character is handed to a [`Scorer`] without waiting for the
//! answer. Jobs are stamped with the session generation and a sequence number
//! so the controller can drop replies that belong to a discarded session or
//! that were overtaken by a newer one.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use itertools::Itertools;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::metrics::MetricsSnapshot;
use crate::util::{mean, std_dev, wpm};

/// The scoring service, consumed as a black box.
pub trait Scorer: Send + 'static {
    fn start_session(&mut self, text: &str);
    fn handle_keystroke(&mut self, ch: char, timestamp_ms: u64) -> Result<MetricsSnapshot>;

    /// Scores a character that landed at `index` of the target. Scorers
    /// that keep their own cursor can rely on the default.
    fn handle_keystroke_at(
        &mut self,
        _index: usize,
        ch: char,
        timestamp_ms: u64,
    ) -> Result<MetricsSnapshot> {
        self.handle_keystroke(ch, timestamp_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreJob {
    pub generation: u64,
    pub seq: u64,
    /// Target position the character was typed at.
    pub index: usize,
    pub ch: char,
    pub timestamp_ms: u64,
    /// Set on the keystroke that completes the session.
    pub is_final: bool,
}

#[derive(Debug)]
pub struct ScoreReply {
    pub generation: u64,
    pub seq: u64,
    pub is_final: bool,
    pub result: Result<MetricsSnapshot>,
}

impl ScoreReply {
    fn answer(job: ScoreJob, result: Result<MetricsSnapshot>) -> Self {
        Self {
            generation: job.generation,
            seq: job.seq,
            is_final: job.is_final,
            result,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Score on the caller's thread; replies are queued for the next drain.
    Inline,
    /// Score on a worker thread fed through a channel.
    #[default]
    Threaded,
}

enum Command {
    Start(String),
    Key(ScoreJob),
}

enum Backend {
    Inline {
        scorer: Box<dyn Scorer>,
        queue: VecDeque<ScoreReply>,
    },
    Threaded {
        tx: Option<Sender<Command>>,
        rx: Receiver<ScoreReply>,
        worker: Option<JoinHandle<()>>,
    },
}

pub struct ScoringPipeline {
    backend: Backend,
}

impl std::fmt::Debug for ScoringPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.backend {
            Backend::Inline { .. } => "inline",
            Backend::Threaded { .. } => "threaded",
        };
        f.debug_struct("ScoringPipeline").field("mode", &mode).finish()
    }
}

impl ScoringPipeline {
    pub fn new<S: Scorer>(scorer: S, mode: DispatchMode) -> Self {
        let backend = match mode {
            DispatchMode::Inline => Backend::Inline {
                scorer: Box::new(scorer),
                queue: VecDeque::new(),
            },
            DispatchMode::Threaded => spawn_worker(Box::new(scorer)),
        };
        Self { backend }
    }

    pub fn start_session(&mut self, text: &str) {
        match &mut self.backend {
            Backend::Inline { scorer, queue } => {
                queue.clear();
                scorer.start_session(text);
            }
            Backend::Threaded { tx, .. } => send(tx, Command::Start(text.to_string())),
        }
    }

    /// Fire-and-forget: never blocks on the scorer in threaded mode.
    pub fn submit(&mut self, job: ScoreJob) {
        match &mut self.backend {
            Backend::Inline { scorer, queue } => {
                let result = scorer.handle_keystroke_at(job.index, job.ch, job.timestamp_ms);
                queue.push_back(ScoreReply::answer(job, result));
            }
            Backend::Threaded { tx, .. } => send(tx, Command::Key(job)),
        }
    }

    /// Collects every reply available right now without blocking.
    pub fn drain(&mut self) -> Vec<ScoreReply> {
        match &mut self.backend {
            Backend::Inline { queue, .. } => queue.drain(..).collect(),
            Backend::Threaded { rx, .. } => {
                let mut replies = Vec::new();
                loop {
                    match rx.try_recv() {
                        Ok(reply) => replies.push(reply),
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            warn!("scoring worker disconnected");
                            break;
                        }
                    }
                }
                replies
            }
        }
    }
}

impl Drop for ScoringPipeline {
    fn drop(&mut self) {
        if let Backend::Threaded { tx, worker, .. } = &mut self.backend {
            // closing the channel ends the worker loop
            tx.take();
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }
    }
}

fn send(tx: &Option<Sender<Command>>, cmd: Command) {
    if let Some(tx) = tx {
        if tx.send(cmd).is_err() {
            warn!("scoring worker is gone, dropping request");
        }
    }
}

fn spawn_worker(mut scorer: Box<dyn Scorer>) -> Backend {
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
    let (reply_tx, reply_rx) = mpsc::channel();

    let worker = thread::spawn(move || {
        for cmd in cmd_rx {
            match cmd {
                Command::Start(text) => scorer.start_session(&text),
                Command::Key(job) => {
                    let result =
                        scorer.handle_keystroke_at(job.index, job.ch, job.timestamp_ms);
                    if reply_tx.send(ScoreReply::answer(job, result)).is_err() {
                        debug!("reply receiver dropped, stopping scoring worker");
                        break;
                    }
                }
            }
        }
    });

    Backend::Threaded {
        tx: Some(cmd_tx),
        rx: reply_rx,
        worker: Some(worker),
    }
}

/// Stand-in scorer computing plain speed, accuracy and rhythm consistency.
///
/// It carries no anti-cheat heuristics; `is_bot` is always false. A typed
/// character counts as correct when it matches the target character at the
/// position it landed on. Typos do not hold the cursor back, so text typed
/// past an uncorrected mistake is still judged against the right
/// characters.
#[derive(Debug, Default, Clone)]
pub struct BaselineScorer {
    target: Vec<char>,
    position: usize,
    timestamps: Vec<u64>,
    correct: u64,
    errors: u64,
}

impl BaselineScorer {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let total = self.correct + self.errors;
        let (first, last) = match (self.timestamps.first(), self.timestamps.last()) {
            (Some(&first), Some(&last)) if self.timestamps.len() >= 2 => (first, last),
            _ => return MetricsSnapshot::default(),
        };
        let duration_ms = last.saturating_sub(first).max(1);

        let raw_wpm = wpm(total as f64, duration_ms);
        let minutes = duration_ms as f64 / 60_000.0;
        let adjusted_wpm = (raw_wpm - self.errors as f64 / minutes).max(0.0);
        let accuracy = self.correct as f64 / total as f64 * 100.0;

        let intervals: Vec<f64> = self
            .timestamps
            .iter()
            .tuple_windows()
            .map(|(a, b)| b.saturating_sub(*a) as f64)
            .filter(|i| *i > 0.0)
            .collect();
        let consistency = match (mean(&intervals), std_dev(&intervals)) {
            (Some(avg), Some(sd)) if avg > 0.0 => 100.0 - (sd / avg) * 100.0,
            _ => 100.0,
        };

        MetricsSnapshot {
            raw_wpm,
            adjusted_wpm,
            accuracy,
            consistency,
            ..MetricsSnapshot::default()
        }
        .sanitized()
    }
}

impl Scorer for BaselineScorer {
    fn start_session(&mut self, text: &str) {
        *self = Self {
            target: text.chars().collect(),
            ..Self::default()
        };
    }

    fn handle_keystroke(&mut self, ch: char, timestamp_ms: u64) -> Result<MetricsSnapshot> {
        if self.target.is_empty() {
            return Err(Error::Scorer("no active session".to_string()));
        }
        self.timestamps.push(timestamp_ms);
        if self.target.get(self.position) == Some(&ch) {
            self.correct += 1;
        } else {
            self.errors += 1;
        }
        self.position += 1;
        Ok(self.snapshot())
    }

    fn handle_keystroke_at(
        &mut self,
        index: usize,
        ch: char,
        timestamp_ms: u64,
    ) -> Result<MetricsSnapshot> {
        // erased characters move the cursor back without telling the scorer
        self.position = index;
        self.handle_keystroke(ch, timestamp_ms)
    }
}
