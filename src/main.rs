use std::{
    error::Error,
    fs::{self, OpenOptions},
    io::{self, stdin},
    path::PathBuf,
    sync::Mutex,
    time::Duration,
};

use chrono::Local;
use clap::{error::ErrorKind, CommandFactory, Parser, Subcommand};
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use ghosttype::{
    app::{Action, App},
    app_dirs::AppDirs,
    broadcast::{FileRaceBoard, ProgressBroadcaster},
    clock::SystemClock,
    config::{Config, ConfigStore, EngineSettings, FileConfigStore},
    controller::SessionController,
    mission::{MissionConfig, MissionConstraint},
    persistence::{write_csv, SqliteAttemptStore},
    replay::{load_log, ReplayFrame},
    runtime::{CrosstermEventSource, Runner},
    scoring::BaselineScorer,
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const TICK_RATE_MS: u64 = 16;

const LESSONS: &[&str] = &[
    "the quick brown fox jumps over the lazy dog",
    "pack my box with five dozen liquor jugs",
    "sphinx of black quartz judge my vow",
    "how vexingly quick daft zebras jump",
    "a wizard's job is to vex chumps quickly in fog",
];

/// real-time typing practice with ghost replays, missions and duels
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "A typing trainer that races you against your own recorded ghost, runs fail-fast missions with speed and accuracy targets, and publishes live progress for head-to-head duels."
)]
pub struct Cli {
    /// text to type (defaults to a built-in lesson)
    #[clap(short = 'p', long)]
    prompt: Option<String>,

    /// race against a replay log written with --save-replay
    #[clap(short = 'g', long)]
    ghost: Option<PathBuf>,

    /// race against your fastest recorded attempt on the same text
    #[clap(long, conflicts_with = "ghost")]
    best_ghost: bool,

    /// write this run's replay log here when it completes
    #[clap(long)]
    save_replay: Option<PathBuf>,

    /// run as a mission that requires this net WPM
    #[clap(long)]
    target_wpm: Option<f64>,

    /// minimum accuracy for the mission, in percent
    #[clap(long, default_value_t = 0.0, requires = "target_wpm")]
    min_accuracy: f64,

    /// mission constraint, may be repeated
    #[clap(long, value_enum, requires = "target_wpm")]
    constraint: Vec<MissionConstraint>,

    /// join a duel with this race id
    #[clap(short = 'r', long)]
    race: Option<String>,

    /// player name shown to opponents
    #[clap(long, requires = "race")]
    player: Option<String>,

    /// directory holding shared race documents
    #[clap(long)]
    race_dir: Option<PathBuf>,

    /// attempt history database
    #[clap(long)]
    db: Option<PathBuf>,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Command {
    /// print recent attempts as CSV
    History {
        #[clap(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
}

impl Cli {
    fn mission(&self) -> Option<MissionConfig> {
        let target = self.target_wpm?;
        Some(
            self.constraint
                .iter()
                .fold(MissionConfig::new(target, self.min_accuracy), |m, c| {
                    m.with_constraint(*c)
                }),
        )
    }

    fn race_dir(&self, config: &Config) -> Option<PathBuf> {
        self.race_dir
            .clone()
            .or_else(|| config.race_dir.clone())
            .or_else(AppDirs::race_dir)
    }
}

fn default_lesson() -> String {
    let idx = Local::now().timestamp().unsigned_abs() as usize % LESSONS.len();
    LESSONS[idx].to_string()
}

fn init_logging() {
    let Some(path) = AppDirs::log_path() else {
        return;
    };
    if let Some(parent) = path.parent() {
        if fs::create_dir_all(parent).is_err() {
            return;
        }
    }
    let Ok(file) = OpenOptions::new().create(true).append(true).open(&path) else {
        return;
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ghosttype=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
}

fn print_history(db_path: Option<PathBuf>, limit: usize) -> Result<(), Box<dyn Error>> {
    let path = db_path.ok_or("no attempt database location available")?;
    let store = SqliteAttemptStore::open(&path)?;
    let rows = store.recent_attempts(limit)?;
    if rows.is_empty() {
        eprintln!("no attempts recorded");
        return Ok(());
    }
    write_csv(io::stdout().lock(), &rows, true)?;
    Ok(())
}

fn pick_ghost(
    cli: &Cli,
    store: Option<&SqliteAttemptStore>,
    text: &str,
) -> Result<Option<Vec<ReplayFrame>>, Box<dyn Error>> {
    if let Some(path) = &cli.ghost {
        return Ok(Some(load_log(path)?));
    }
    if !cli.best_ghost {
        return Ok(None);
    }
    let best = store.and_then(|s| {
        s.best_replay(text).unwrap_or_else(|e| {
            warn!("could not load best replay: {}", e);
            None
        })
    });
    if best.is_none() {
        info!("no previous attempt on this text, racing without a ghost");
    }
    Ok(best)
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging();

    let config = FileConfigStore::new().load();
    let db_path = cli.db.clone().or_else(AppDirs::db_path);

    if let Some(Command::History { limit }) = cli.command {
        return print_history(db_path, limit);
    }

    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    let text = cli.prompt.clone().unwrap_or_else(default_lesson);
    let store = db_path.as_ref().and_then(|path| {
        SqliteAttemptStore::open(path)
            .map_err(|e| warn!(path = %path.display(), "history disabled: {}", e))
            .ok()
    });
    let ghost = pick_ghost(&cli, store.as_ref(), &text)?;

    let settings = EngineSettings::from(&config);
    let mut controller =
        SessionController::new(SystemClock::new(), BaselineScorer::new(), settings);

    if let Some(mission) = cli.mission() {
        controller.brief_mission(mission)?;
        controller.deploy_mission()?;
    }
    if let Some(race) = &cli.race {
        let dir = cli
            .race_dir(&config)
            .ok_or("no race directory available")?;
        let player = cli
            .player
            .clone()
            .unwrap_or_else(|| config.player_name.clone());
        info!(race = %race, player = %player, "joining race");
        controller = controller.with_broadcaster(ProgressBroadcaster::new(
            FileRaceBoard::new(dir),
            race.clone(),
            player,
            config.broadcast_throttle_ms,
            settings.dispatch,
        ));
    }
    if let Some(store) = store {
        let store = match AppDirs::mirror_path() {
            Some(mirror) => store.with_mirror(mirror),
            None => store,
        };
        controller = controller.with_sink(Box::new(store));
    }

    let mut app = App::new(controller, &text, ghost).with_replay_out(cli.save_replay.clone());

    enable_raw_mode()?;

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = start_tui(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn start_tui<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App<SystemClock>,
) -> Result<(), Box<dyn Error>> {
    let runner = Runner::new(
        CrosstermEventSource::new(),
        Duration::from_millis(TICK_RATE_MS),
    );

    loop {
        terminal.draw(|f| f.render_widget(&*app, f.area()))?;
        if app.on_event(runner.step()) == Action::Quit {
            break;
        }
    }

    Ok(())
}
