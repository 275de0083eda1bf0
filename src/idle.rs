use tracing::debug;

use crate::scheduler::{Scheduler, TimerKind};
use crate::session::{Session, SessionStatus};

pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 2000;

/// Toggles a session between `Running` and `Paused` around inactivity.
#[derive(Debug, Clone, Copy)]
pub struct IdlePauseDetector {
    timeout_ms: u64,
}

impl Default for IdlePauseDetector {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT_MS)
    }
}

impl IdlePauseDetector {
    pub fn new(timeout_ms: u64) -> Self {
        Self { timeout_ms }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn arm(&self, scheduler: &mut Scheduler, now: u64) {
        scheduler.arm(TimerKind::IdlePause, now, self.timeout_ms);
    }

    pub fn disarm(&self, scheduler: &mut Scheduler) {
        scheduler.cancel_kind(TimerKind::IdlePause);
    }

    /// Handles the idle timer firing. Returns true if the session paused.
    pub fn on_timeout(&self, session: &mut Session, now: u64) -> bool {
        if session.status != SessionStatus::Running {
            return false;
        }
        session.status = SessionStatus::Paused;
        session.pause_started_at_ms = Some(now);
        debug!(generation = session.generation, at = now, "session paused");
        true
    }

    /// Closes an open pause on new input. Returns true if the session resumed.
    pub fn resume(&self, session: &mut Session, now: u64) -> bool {
        if session.status != SessionStatus::Paused {
            return false;
        }
        if let Some(paused_at) = session.pause_started_at_ms.take() {
            session.total_paused_ms += now.saturating_sub(paused_at);
        }
        session.status = SessionStatus::Running;
        debug!(
            generation = session.generation,
            total_paused_ms = session.total_paused_ms,
            "session resumed"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_pauses_running_session() {
        let detector = IdlePauseDetector::default();
        let mut session = Session::new("abc", 1, 0);

        assert!(detector.on_timeout(&mut session, 2000));
        assert_eq!(session.status, SessionStatus::Paused);
        assert_eq!(session.pause_started_at_ms, Some(2000));

        // already paused
        assert!(!detector.on_timeout(&mut session, 2500));
    }

    #[test]
    fn resume_accumulates_paused_time() {
        let detector = IdlePauseDetector::default();
        let mut session = Session::new("abc", 1, 0);
        detector.on_timeout(&mut session, 2000);

        assert!(detector.resume(&mut session, 7000));
        assert_eq!(session.status, SessionStatus::Running);
        assert!(session.total_paused_ms >= 5000);
        assert_eq!(session.active_elapsed_ms(7000), 2000);
    }

    #[test]
    fn resume_is_noop_when_running() {
        let detector = IdlePauseDetector::default();
        let mut session = Session::new("abc", 1, 0);
        assert!(!detector.resume(&mut session, 100));
        assert_eq!(session.total_paused_ms, 0);
    }

    #[test]
    fn timeout_ignored_after_completion() {
        let detector = IdlePauseDetector::default();
        let mut session = Session::new("a", 1, 0);
        session.status = SessionStatus::Completed;
        assert!(!detector.on_timeout(&mut session, 5000));
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[test]
    fn arm_and_disarm() {
        let detector = IdlePauseDetector::new(500);
        let mut sched = Scheduler::new();
        detector.arm(&mut sched, 100);
        assert_eq!(sched.due_at(TimerKind::IdlePause), Some(600));
        detector.disarm(&mut sched);
        assert!(!sched.is_armed(TimerKind::IdlePause));
    }
}
