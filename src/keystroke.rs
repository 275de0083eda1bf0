use crate::mission::MissionEvaluator;
use crate::replay::ReplayRecorder;
use crate::scoring::ScoreJob;
use crate::session::Session;

/// A physical key event as the engine sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    Char(char),
    Backspace,
    /// Modifier combos, navigation and other non-printing keys.
    Other,
}

impl KeyInput {
    /// Maps a key name (`"a"`, `"Backspace"`, `"Shift"`) to an input.
    pub fn from_key_name(name: &str) -> Self {
        if name == "Backspace" {
            return KeyInput::Backspace;
        }
        let mut chars = name.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if !c.is_control() => KeyInput::Char(c),
            _ => KeyInput::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyOutcome {
    /// Nothing changed: the session is not live, the key is not printable,
    /// the input is full, or there was nothing to erase.
    Ignored,
    Erased {
        ch: char,
    },
    /// The mission forbids backspace; it failed and the edit was dropped.
    BackspaceRejected,
    Accepted {
        ch: char,
        expected: char,
        correct: bool,
        relative_time: u64,
        completes: bool,
        job: ScoreJob,
    },
}

/// Local, instant half of keystroke handling.
///
/// Applies one key to the session in place and produces the scoring request
/// for the authoritative half, which the caller dispatches without waiting.
#[derive(Debug, Default)]
pub struct KeystrokeProcessor {
    next_seq: u64,
}

impl KeystrokeProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.next_seq = 0;
    }

    pub fn process(
        &mut self,
        session: &mut Session,
        recorder: &mut ReplayRecorder,
        mission: &mut MissionEvaluator,
        key: KeyInput,
        now: u64,
    ) -> KeyOutcome {
        if !session.is_live() {
            return KeyOutcome::Ignored;
        }
        match key {
            KeyInput::Backspace => {
                if mission.check_backspace() {
                    return KeyOutcome::BackspaceRejected;
                }
                match session.input.pop() {
                    Some(ch) => KeyOutcome::Erased { ch },
                    None => KeyOutcome::Ignored,
                }
            }
            KeyInput::Char(ch) => self.write(session, recorder, mission, ch, now),
            KeyInput::Other => KeyOutcome::Ignored,
        }
    }

    fn write(
        &mut self,
        session: &mut Session,
        recorder: &mut ReplayRecorder,
        mission: &mut MissionEvaluator,
        ch: char,
        now: u64,
    ) -> KeyOutcome {
        let idx = session.input.len();
        let Some(expected) = session.expected_char(idx) else {
            return KeyOutcome::Ignored;
        };

        session.total_keystrokes += 1;
        session.input.push(ch);
        let correct = ch == expected;
        if !correct {
            *session.errors_by_target_char.entry(expected).or_insert(0) += 1;
        }

        let relative_time = session.active_elapsed_ms(now);
        recorder.record(ch, relative_time);
        mission.check_keystroke(correct);

        self.next_seq += 1;
        let completes = session.is_complete();
        KeyOutcome::Accepted {
            ch,
            expected,
            correct,
            relative_time,
            completes,
            job: ScoreJob {
                generation: session.generation,
                seq: self.next_seq,
                index: idx,
                ch,
                timestamp_ms: relative_time,
                is_final: completes,
            },
        }
    }
}
