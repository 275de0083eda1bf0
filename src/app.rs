use std::path::PathBuf;

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::controller::SessionController;
use crate::replay::{save_log, ReplayFrame};
use crate::runtime::{key_input, AppEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Typing,
    Results,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Continue,
    Quit,
}

/// Terminal front end state: which screen is up, plus the controller that
/// owns the session.
#[derive(Debug)]
pub struct App<C: Clock> {
    pub controller: SessionController<C>,
    pub state: AppState,
    replay_out: Option<PathBuf>,
}

impl<C: Clock> App<C> {
    pub fn new(
        mut controller: SessionController<C>,
        text: &str,
        ghost: Option<Vec<ReplayFrame>>,
    ) -> Self {
        controller.start_lesson(text, ghost);
        Self {
            controller,
            state: AppState::Typing,
            replay_out: None,
        }
    }

    /// Completed runs write their replay log here.
    pub fn with_replay_out(mut self, path: Option<PathBuf>) -> Self {
        self.replay_out = path;
        self
    }

    pub fn on_event(&mut self, event: AppEvent) -> Action {
        let action = match event {
            AppEvent::Tick => {
                self.controller.on_tick();
                Action::Continue
            }
            AppEvent::Resize => Action::Continue,
            AppEvent::Key(key) => self.on_key(key),
        };
        self.sync_state();
        action
    }

    fn on_key(&mut self, key: KeyEvent) -> Action {
        if key.kind == KeyEventKind::Release {
            return Action::Continue;
        }
        let ctrl_c =
            key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c');
        if key.code == KeyCode::Esc || ctrl_c {
            self.controller.shutdown();
            return Action::Quit;
        }

        match self.state {
            AppState::Typing => {
                if key.code == KeyCode::Left {
                    self.retry();
                } else {
                    self.controller.on_key_down(key_input(&key));
                }
            }
            AppState::Results => {
                if matches!(key.code, KeyCode::Char('r') | KeyCode::Left) {
                    self.retry();
                }
            }
        }
        Action::Continue
    }

    fn retry(&mut self) {
        if self.controller.retry_lesson() {
            self.state = AppState::Typing;
        }
    }

    fn sync_state(&mut self) {
        if self.state == AppState::Typing && self.controller.show_result() {
            self.state = AppState::Results;
            self.save_replay();
        }
    }

    fn save_replay(&self) {
        let (Some(path), Some(_)) = (&self.replay_out, self.controller.report()) else {
            return;
        };
        match save_log(path, self.controller.replay_log()) {
            Ok(()) => info!(path = %path.display(), "replay saved"),
            Err(e) => warn!(path = %path.display(), "failed to save replay: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineSettings;
    use crate::replay::load_log;
    use crate::scoring::{BaselineScorer, DispatchMode};
    use crate::session::SessionStatus;
    use tempfile::tempdir;

    fn app(text: &str) -> (ManualClock, App<ManualClock>) {
        let clock = ManualClock::new(0);
        let settings = EngineSettings {
            dispatch: DispatchMode::Inline,
            ..EngineSettings::default()
        };
        let controller = SessionController::new(clock.clone(), BaselineScorer::new(), settings);
        (clock, App::new(controller, text, None))
    }

    fn key(code: KeyCode) -> AppEvent {
        AppEvent::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    #[test]
    fn finishing_switches_to_results() {
        let (clock, mut app) = app("ok");
        for c in "ok".chars() {
            clock.advance(100);
            assert_eq!(app.on_event(key(KeyCode::Char(c))), Action::Continue);
        }
        assert_eq!(app.state, AppState::Results);

        // typing on the results screen does nothing but r retries
        app.on_event(key(KeyCode::Char('x')));
        assert_eq!(app.controller.status(), SessionStatus::Completed);
        app.on_event(key(KeyCode::Char('r')));
        assert_eq!(app.state, AppState::Typing);
        assert!(app.controller.input().is_empty());
    }

    #[test]
    fn escape_quits() {
        let (_clock, mut app) = app("ok");
        assert_eq!(app.on_event(key(KeyCode::Esc)), Action::Quit);

        let (_clock, mut app) = self::app("ok");
        let ctrl_c = AppEvent::Key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert_eq!(app.on_event(ctrl_c), Action::Quit);
    }

    #[test]
    fn completed_run_writes_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.json");
        let (clock, app) = app("ab");
        let mut app = app.with_replay_out(Some(path.clone()));

        for c in "ab".chars() {
            clock.advance(200);
            app.on_event(key(KeyCode::Char(c)));
        }
        let log = load_log(&path).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].time, 400);
    }

    #[test]
    fn ticks_drive_the_idle_pause() {
        let (clock, mut app) = app("abc");
        clock.advance(100);
        app.on_event(key(KeyCode::Char('a')));
        clock.advance(2500);
        app.on_event(AppEvent::Tick);
        assert!(app.controller.is_paused());
        assert_eq!(app.state, AppState::Typing);
    }
}
