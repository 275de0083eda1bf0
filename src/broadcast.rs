//! Duel progress publishing.
//!
//! The broadcaster writes this player's progress into a shared race document
//! and mirrors the other players' fields back. Transport work never blocks
//! the input path: failures are logged and the typist never sees them.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::metrics::MetricsSnapshot;
use crate::scoring::DispatchMode;
use crate::session::Session;

pub const DEFAULT_BROADCAST_THROTTLE_MS: u64 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DuelProgressMessage {
    pub wpm: u32,
    pub cursor_index: usize,
    #[serde(rename = "progress")]
    pub progress_percent: f64,
    pub is_finished: bool,
}

impl DuelProgressMessage {
    pub fn from_session(session: &Session, metrics: &MetricsSnapshot) -> Self {
        Self {
            wpm: metrics.adjusted_wpm.round().max(0.0) as u32,
            cursor_index: session.input.len(),
            progress_percent: session.progress_percent(),
            is_finished: session.is_complete(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpponentProgress {
    pub player_id: String,
    pub progress: DuelProgressMessage,
}

/// Shared key-value race document. Last write wins; no transactions.
pub trait RaceTransport: Send + 'static {
    fn write_progress(
        &mut self,
        race_id: &str,
        player_id: &str,
        msg: &DuelProgressMessage,
    ) -> Result<()>;

    fn read_opponents(&mut self, race_id: &str, player_id: &str) -> Result<Vec<OpponentProgress>>;
}

type Players = BTreeMap<String, DuelProgressMessage>;

fn opponents_of(players: &Players, player_id: &str) -> Vec<OpponentProgress> {
    players
        .iter()
        .filter(|(id, _)| id.as_str() != player_id)
        .map(|(id, msg)| OpponentProgress {
            player_id: id.clone(),
            progress: *msg,
        })
        .collect()
}

/// In-process race board; clones share the same document set.
#[derive(Debug, Clone, Default)]
pub struct MemoryRaceBoard {
    races: Arc<Mutex<HashMap<String, Players>>>,
}

impl MemoryRaceBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn player(&self, race_id: &str, player_id: &str) -> Option<DuelProgressMessage> {
        let races = self.races.lock().ok()?;
        races.get(race_id)?.get(player_id).copied()
    }
}

impl RaceTransport for MemoryRaceBoard {
    fn write_progress(
        &mut self,
        race_id: &str,
        player_id: &str,
        msg: &DuelProgressMessage,
    ) -> Result<()> {
        let mut races = self
            .races
            .lock()
            .map_err(|_| Error::Transport("race board poisoned".to_string()))?;
        races
            .entry(race_id.to_string())
            .or_default()
            .insert(player_id.to_string(), *msg);
        Ok(())
    }

    fn read_opponents(&mut self, race_id: &str, player_id: &str) -> Result<Vec<OpponentProgress>> {
        let races = self
            .races
            .lock()
            .map_err(|_| Error::Transport("race board poisoned".to_string()))?;
        Ok(races
            .get(race_id)
            .map(|players| opponents_of(players, player_id))
            .unwrap_or_default())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RaceDocument {
    #[serde(default)]
    players: Players,
}

/// One JSON document per race id inside a directory, so two terminals on
/// the same machine can race each other.
#[derive(Debug, Clone)]
pub struct FileRaceBoard {
    dir: PathBuf,
}

impl FileRaceBoard {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn doc_path(&self, race_id: &str) -> Result<PathBuf> {
        if race_id.is_empty() || race_id.contains(['/', '\\', '.']) {
            return Err(Error::Transport(format!("invalid race id {race_id:?}")));
        }
        Ok(self.dir.join(format!("{race_id}.json")))
    }

    fn load(path: &Path) -> Result<RaceDocument> {
        match fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RaceDocument::default()),
            Err(e) => Err(e.into()),
        }
    }
}

impl RaceTransport for FileRaceBoard {
    fn write_progress(
        &mut self,
        race_id: &str,
        player_id: &str,
        msg: &DuelProgressMessage,
    ) -> Result<()> {
        let path = self.doc_path(race_id)?;
        fs::create_dir_all(&self.dir)?;
        let mut doc = Self::load(&path)?;
        doc.players.insert(player_id.to_string(), *msg);

        let tmp = path.with_extension(format!("{player_id}.tmp"));
        fs::write(&tmp, serde_json::to_vec(&doc)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn read_opponents(&mut self, race_id: &str, player_id: &str) -> Result<Vec<OpponentProgress>> {
        let doc = Self::load(&self.doc_path(race_id)?)?;
        Ok(opponents_of(&doc.players, player_id))
    }
}

enum Outbound {
    Publish(DuelProgressMessage),
    Refresh,
}

enum Backend {
    Inline(Box<dyn RaceTransport>),
    Threaded {
        tx: Option<Sender<Outbound>>,
        rx: Receiver<Vec<OpponentProgress>>,
        worker: Option<JoinHandle<()>>,
    },
}

/// Throttled publisher of this player's duel progress.
pub struct ProgressBroadcaster {
    race_id: String,
    player_id: String,
    throttle_ms: u64,
    last_sent_at: Option<u64>,
    finished_sent: bool,
    opponents: Vec<OpponentProgress>,
    backend: Backend,
}

impl std::fmt::Debug for ProgressBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressBroadcaster")
            .field("race_id", &self.race_id)
            .field("player_id", &self.player_id)
            .field("throttle_ms", &self.throttle_ms)
            .field("finished_sent", &self.finished_sent)
            .finish()
    }
}

impl ProgressBroadcaster {
    pub fn new<T: RaceTransport>(
        transport: T,
        race_id: impl Into<String>,
        player_id: impl Into<String>,
        throttle_ms: u64,
        mode: DispatchMode,
    ) -> Self {
        let race_id = race_id.into();
        let player_id = player_id.into();
        let backend = match mode {
            DispatchMode::Inline => Backend::Inline(Box::new(transport)),
            DispatchMode::Threaded => {
                spawn_worker(Box::new(transport), race_id.clone(), player_id.clone())
            }
        };
        Self {
            race_id,
            player_id,
            throttle_ms,
            last_sent_at: None,
            finished_sent: false,
            opponents: Vec::new(),
            backend,
        }
    }

    pub fn race_id(&self) -> &str {
        &self.race_id
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    /// Forgets throttle and finish state for a fresh session.
    pub fn reset(&mut self) {
        self.last_sent_at = None;
        self.finished_sent = false;
    }

    pub fn has_finished(&self) -> bool {
        self.finished_sent
    }

    /// Publishes if the throttle window has passed. Returns true if sent.
    pub fn on_tick(&mut self, now: u64, msg: DuelProgressMessage) -> bool {
        if self.finished_sent {
            return false;
        }
        if let Some(last) = self.last_sent_at {
            if now.saturating_sub(last) < self.throttle_ms {
                return false;
            }
        }
        self.last_sent_at = Some(now);
        self.dispatch(Outbound::Publish(msg));
        self.dispatch(Outbound::Refresh);
        true
    }

    /// Publishes the finished message exactly once, ignoring the throttle.
    pub fn finish(&mut self, now: u64, msg: DuelProgressMessage) {
        if self.finished_sent {
            return;
        }
        self.finished_sent = true;
        self.last_sent_at = Some(now);
        self.dispatch(Outbound::Publish(DuelProgressMessage {
            is_finished: true,
            progress_percent: msg.progress_percent.min(100.0),
            ..msg
        }));
        self.dispatch(Outbound::Refresh);
    }

    /// Re-reads opponent progress without publishing.
    pub fn refresh(&mut self) {
        self.dispatch(Outbound::Refresh);
    }

    /// Picks up opponent snapshots delivered by the worker thread.
    pub fn poll(&mut self) {
        if let Backend::Threaded { rx, .. } = &self.backend {
            loop {
                match rx.try_recv() {
                    Ok(opponents) => self.opponents = opponents,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
        }
    }

    pub fn opponents(&self) -> &[OpponentProgress] {
        &self.opponents
    }

    fn dispatch(&mut self, out: Outbound) {
        match &mut self.backend {
            Backend::Inline(transport) => {
                if let Some(opponents) =
                    run_outbound(transport.as_mut(), &self.race_id, &self.player_id, out)
                {
                    self.opponents = opponents;
                }
            }
            Backend::Threaded { tx, .. } => {
                if let Some(tx) = tx {
                    if tx.send(out).is_err() {
                        warn!(race = %self.race_id, "broadcast worker is gone");
                    }
                }
            }
        }
    }
}

impl Drop for ProgressBroadcaster {
    fn drop(&mut self) {
        if let Backend::Threaded { tx, worker, .. } = &mut self.backend {
            tx.take();
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }
    }
}

fn run_outbound(
    transport: &mut dyn RaceTransport,
    race_id: &str,
    player_id: &str,
    out: Outbound,
) -> Option<Vec<OpponentProgress>> {
    match out {
        Outbound::Publish(msg) => {
            if let Err(e) = transport.write_progress(race_id, player_id, &msg) {
                warn!(race = race_id, "failed to publish progress: {}", e);
            } else {
                debug!(race = race_id, progress = msg.progress_percent, "progress published");
            }
            None
        }
        Outbound::Refresh => match transport.read_opponents(race_id, player_id) {
            Ok(opponents) => Some(opponents),
            Err(e) => {
                warn!(race = race_id, "failed to read opponents: {}", e);
                None
            }
        },
    }
}

fn spawn_worker(
    mut transport: Box<dyn RaceTransport>,
    race_id: String,
    player_id: String,
) -> Backend {
    let (tx, out_rx) = mpsc::channel::<Outbound>();
    let (opp_tx, rx) = mpsc::channel();

    let worker = thread::spawn(move || {
        for out in out_rx {
            if let Some(opponents) = run_outbound(transport.as_mut(), &race_id, &player_id, out) {
                if opp_tx.send(opponents).is_err() {
                    break;
                }
            }
        }
    });

    Backend::Threaded {
        tx: Some(tx),
        rx,
        worker: Some(worker),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn msg(cursor_index: usize, progress_percent: f64) -> DuelProgressMessage {
        DuelProgressMessage {
            wpm: 40,
            cursor_index,
            progress_percent,
            is_finished: false,
        }
    }

    #[test]
    fn progress_is_clamped() {
        let mut session = Session::new("ab", 1, 0);
        session.input = vec!['a', 'b'];
        let m = DuelProgressMessage::from_session(&session, &MetricsSnapshot::default());
        assert_eq!(m.progress_percent, 100.0);
        assert_eq!(m.cursor_index, 2);
        assert!(m.is_finished);
    }

    #[test]
    fn message_uses_shared_document_field_names() {
        let json = serde_json::to_value(msg(3, 50.0)).unwrap();
        assert_eq!(json["cursorIndex"], 3);
        assert_eq!(json["progress"], 50.0);
        assert_eq!(json["isFinished"], false);
    }

    #[test]
    fn throttle_limits_publishes() {
        let board = MemoryRaceBoard::new();
        let mut b = ProgressBroadcaster::new(board.clone(), "r1", "me", 250, DispatchMode::Inline);

        assert!(b.on_tick(0, msg(1, 10.0)));
        assert!(!b.on_tick(100, msg(2, 20.0)));
        assert_eq!(board.player("r1", "me").unwrap().cursor_index, 1);

        assert!(b.on_tick(250, msg(3, 30.0)));
        assert_eq!(board.player("r1", "me").unwrap().cursor_index, 3);
    }

    #[test]
    fn finish_is_sent_once_and_stops_ticks() {
        let board = MemoryRaceBoard::new();
        let mut b = ProgressBroadcaster::new(board.clone(), "r1", "me", 250, DispatchMode::Inline);
        b.on_tick(0, msg(1, 10.0));
        b.finish(10, msg(4, 100.0));

        let stored = board.player("r1", "me").unwrap();
        assert!(stored.is_finished);
        assert!(b.has_finished());
        assert!(!b.on_tick(10_000, msg(0, 0.0)));
        assert!(board.player("r1", "me").unwrap().is_finished);
    }

    #[test]
    fn opponents_are_mirrored() {
        let board = MemoryRaceBoard::new();
        let mut me = ProgressBroadcaster::new(board.clone(), "r1", "me", 0, DispatchMode::Inline);
        let mut rival =
            ProgressBroadcaster::new(board.clone(), "r1", "rival", 0, DispatchMode::Inline);

        rival.on_tick(0, msg(5, 50.0));
        me.on_tick(0, msg(2, 20.0));

        assert_eq!(me.opponents().len(), 1);
        assert_eq!(me.opponents()[0].player_id, "rival");
        assert_eq!(me.opponents()[0].progress.cursor_index, 5);
    }

    #[test]
    fn file_board_round_trip() {
        let dir = tempdir().unwrap();
        let mut a = FileRaceBoard::new(dir.path());
        let mut b = FileRaceBoard::new(dir.path());

        a.write_progress("duel", "alice", &msg(3, 30.0)).unwrap();
        b.write_progress("duel", "bob", &msg(7, 70.0)).unwrap();

        let seen_by_alice = a.read_opponents("duel", "alice").unwrap();
        assert_eq!(seen_by_alice.len(), 1);
        assert_eq!(seen_by_alice[0].player_id, "bob");
        assert_eq!(seen_by_alice[0].progress.cursor_index, 7);
    }

    #[test]
    fn file_board_rejects_path_like_ids() {
        let dir = tempdir().unwrap();
        let mut board = FileRaceBoard::new(dir.path());
        assert!(board.write_progress("../x", "me", &msg(0, 0.0)).is_err());
    }

    #[test]
    fn missing_race_has_no_opponents() {
        let dir = tempdir().unwrap();
        let mut board = FileRaceBoard::new(dir.path());
        assert!(board.read_opponents("empty", "me").unwrap().is_empty());
    }

    #[test]
    fn threaded_broadcaster_publishes_in_background() {
        let board = MemoryRaceBoard::new();
        {
            let mut b =
                ProgressBroadcaster::new(board.clone(), "r2", "me", 0, DispatchMode::Threaded);
            b.finish(0, msg(2, 100.0));
            // dropping joins the worker after the queue drains
        }
        assert!(board.player("r2", "me").unwrap().is_finished);
    }
}
