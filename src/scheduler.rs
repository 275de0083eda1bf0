//! Explicit timer bookkeeping for the session controller.
//!
//! Timers are plain data: the controller arms them on state transitions and
//! polls the due ones on every tick. Nothing fires on its own, so a timer that
//! was cancelled (or belonged to a discarded session) can never run.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Single-shot inactivity timer, re-armed on each accepted keystroke.
    IdlePause,
    /// Interval timer producing performance graph samples.
    Sample,
    /// Flushes a throttled metrics update at the end of its window.
    MetricsFlush,
    /// Animation-frame loop for the ghost cursor and duel view.
    Frame,
    /// Gives up waiting for the final scorer reply after completion.
    FinalScoreDeadline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// A timer popped by [`Scheduler::poll_due`], with the time it was due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fired {
    pub kind: TimerKind,
    pub due_at: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    handle: TimerHandle,
    kind: TimerKind,
    due_at: u64,
    interval: Option<u64>,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    entries: Vec<Entry>,
    next_id: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a single-shot timer. Any timer of the same kind is replaced.
    pub fn arm(&mut self, kind: TimerKind, now: u64, after_ms: u64) -> TimerHandle {
        self.insert(kind, now.saturating_add(after_ms), None)
    }

    /// Arms a repeating timer. Any timer of the same kind is replaced.
    pub fn arm_interval(&mut self, kind: TimerKind, now: u64, every_ms: u64) -> TimerHandle {
        let every_ms = every_ms.max(1);
        self.insert(kind, now.saturating_add(every_ms), Some(every_ms))
    }

    fn insert(&mut self, kind: TimerKind, due_at: u64, interval: Option<u64>) -> TimerHandle {
        self.cancel_kind(kind);
        self.next_id += 1;
        let handle = TimerHandle(self.next_id);
        self.entries.push(Entry {
            handle,
            kind,
            due_at,
            interval,
        });
        handle
    }

    /// Returns true if the handle was still armed.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.handle != handle);
        before != self.entries.len()
    }

    pub fn cancel_kind(&mut self, kind: TimerKind) {
        self.entries.retain(|e| e.kind != kind);
    }

    pub fn cancel_all(&mut self) {
        self.entries.clear();
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.entries.iter().any(|e| e.kind == kind)
    }

    pub fn armed_count(&self) -> usize {
        self.entries.len()
    }

    pub fn due_at(&self, kind: TimerKind) -> Option<u64> {
        self.entries.iter().find(|e| e.kind == kind).map(|e| e.due_at)
    }

    /// Pops every timer due at `now`, earliest first. Single-shot timers are
    /// removed; interval timers fire once and move to their next period after
    /// `now` (missed periods are coalesced).
    pub fn poll_due(&mut self, now: u64) -> Vec<Fired> {
        let mut due: Vec<Fired> = Vec::new();
        self.entries.retain_mut(|e| {
            if e.due_at > now {
                return true;
            }
            due.push(Fired {
                kind: e.kind,
                due_at: e.due_at,
            });
            match e.interval {
                Some(every) => {
                    let missed = (now - e.due_at) / every + 1;
                    e.due_at += missed * every;
                    true
                }
                None => false,
            }
        });
        due.sort_by_key(|f| f.due_at);
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(fired: Vec<Fired>) -> Vec<TimerKind> {
        fired.into_iter().map(|f| f.kind).collect()
    }

    #[test]
    fn single_shot_fires_once() {
        let mut sched = Scheduler::new();
        sched.arm(TimerKind::IdlePause, 0, 2000);

        assert!(sched.poll_due(1999).is_empty());
        assert_eq!(kinds(sched.poll_due(2000)), vec![TimerKind::IdlePause]);
        assert!(sched.poll_due(5000).is_empty());
        assert!(!sched.is_armed(TimerKind::IdlePause));
    }

    #[test]
    fn rearm_replaces_previous_timer() {
        let mut sched = Scheduler::new();
        sched.arm(TimerKind::IdlePause, 0, 2000);
        sched.arm(TimerKind::IdlePause, 1500, 2000);

        assert_eq!(sched.armed_count(), 1);
        assert!(sched.poll_due(2000).is_empty());
        assert_eq!(kinds(sched.poll_due(3500)), vec![TimerKind::IdlePause]);
    }

    #[test]
    fn interval_coalesces_missed_periods() {
        let mut sched = Scheduler::new();
        sched.arm_interval(TimerKind::Sample, 0, 1000);

        assert_eq!(
            sched.poll_due(3500),
            vec![Fired {
                kind: TimerKind::Sample,
                due_at: 1000
            }]
        );
        assert_eq!(sched.due_at(TimerKind::Sample), Some(4000));
        assert_eq!(kinds(sched.poll_due(4000)), vec![TimerKind::Sample]);
    }

    #[test]
    fn cancel_by_handle() {
        let mut sched = Scheduler::new();
        let handle = sched.arm(TimerKind::Frame, 0, 16);
        assert!(sched.cancel(handle));
        assert!(!sched.cancel(handle));
        assert!(sched.poll_due(100).is_empty());
    }

    #[test]
    fn due_timers_come_out_in_order() {
        let mut sched = Scheduler::new();
        sched.arm(TimerKind::MetricsFlush, 0, 250);
        sched.arm(TimerKind::IdlePause, 0, 100);
        sched.arm_interval(TimerKind::Sample, 0, 200);

        assert_eq!(
            kinds(sched.poll_due(300)),
            vec![TimerKind::IdlePause, TimerKind::Sample, TimerKind::MetricsFlush]
        );
    }

    #[test]
    fn cancel_all_disarms_everything() {
        let mut sched = Scheduler::new();
        sched.arm(TimerKind::IdlePause, 0, 10);
        sched.arm_interval(TimerKind::Frame, 0, 16);
        sched.cancel_all();
        assert_eq!(sched.armed_count(), 0);
        assert!(sched.poll_due(1000).is_empty());
    }
}
