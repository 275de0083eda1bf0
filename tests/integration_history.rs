use assert_cmd::Command;
use ghosttype::clock::ManualClock;
use ghosttype::config::EngineSettings;
use ghosttype::controller::SessionController;
use ghosttype::keystroke::KeyInput;
use ghosttype::mission::{MissionConfig, MissionState};
use ghosttype::persistence::SqliteAttemptStore;
use ghosttype::scoring::{BaselineScorer, DispatchMode};
use tempfile::tempdir;

fn settings() -> EngineSettings {
    EngineSettings {
        dispatch: DispatchMode::Inline,
        ..EngineSettings::default()
    }
}

fn type_text(clock: &ManualClock, ctl: &mut SessionController<ManualClock>, text: &str, gap: u64) {
    for c in text.chars() {
        clock.advance(gap);
        ctl.on_key_down(KeyInput::Char(c));
    }
}

fn run_into(db: &std::path::Path, text: &str, gap: u64) {
    let clock = ManualClock::new(0);
    let store = SqliteAttemptStore::open(db).unwrap();
    let mut ctl = SessionController::new(clock.clone(), BaselineScorer::new(), settings())
        .with_sink(Box::new(store));
    ctl.start_lesson(text, None);
    type_text(&clock, &mut ctl, text, gap);
    assert!(ctl.report().is_some());
}

#[test]
fn completed_runs_become_ghosts() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("attempts.db");

    run_into(&db, "ghost", 300);
    run_into(&db, "ghost", 100);

    let store = SqliteAttemptStore::open(&db).unwrap();
    assert_eq!(store.recent_attempts(10).unwrap().len(), 2);

    // the fastest run is the one raced next
    let ghost = store.best_replay("ghost").unwrap().unwrap();
    assert_eq!(ghost.len(), 5);
    assert_eq!(ghost.last().unwrap().time, 500);

    let clock = ManualClock::new(0);
    let mut ctl = SessionController::new(clock.clone(), BaselineScorer::new(), settings());
    ctl.start_lesson("ghost", Some(ghost));
    clock.advance(250);
    ctl.on_tick();
    assert_eq!(ctl.ghost_cursor(), Some(2));
}

#[test]
fn mission_outcome_is_stored_with_the_attempt() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("attempts.db");
    let clock = ManualClock::new(0);
    let store = SqliteAttemptStore::open(&db).unwrap();
    let mut ctl = SessionController::new(clock.clone(), BaselineScorer::new(), settings())
        .with_sink(Box::new(store));
    ctl.brief_mission(MissionConfig::new(10.0, 90.0)).unwrap();
    ctl.deploy_mission().unwrap();
    ctl.start_lesson("abc", None);
    type_text(&clock, &mut ctl, "abc", 200);
    assert_eq!(ctl.mission_state(), &MissionState::Succeeded);

    let rows = SqliteAttemptStore::open(&db)
        .unwrap()
        .recent_attempts(1)
        .unwrap();
    assert_eq!(rows[0].mission, "succeeded");
    assert_eq!(rows[0].keystrokes, 3);
}

#[test]
fn history_subcommand_prints_csv() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("attempts.db");
    run_into(&db, "csv row", 100);

    let output = Command::cargo_bin("ghosttype")
        .unwrap()
        .env("HOME", dir.path())
        .arg("--db")
        .arg(&db)
        .arg("history")
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let mut lines = stdout.lines();
    assert!(lines.next().unwrap().starts_with("session_id,recorded_at,wpm"));
    assert!(lines.next().unwrap().ends_with("csv row"));
}

#[test]
fn history_on_empty_database() {
    let dir = tempdir().unwrap();
    Command::cargo_bin("ghosttype")
        .unwrap()
        .env("HOME", dir.path())
        .arg("--db")
        .arg(dir.path().join("empty.db"))
        .arg("history")
        .assert()
        .success()
        .stderr("no attempts recorded\n");
}
