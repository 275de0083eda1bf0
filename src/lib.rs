// Library surface for the binary, headless/integration tests and reuse.
pub mod app;
pub mod app_dirs;
pub mod broadcast;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod idle;
pub mod keystroke;
pub mod metrics;
pub mod mission;
pub mod persistence;
pub mod replay;
pub mod runtime;
pub mod scheduler;
pub mod scoring;
pub mod session;
pub mod time_series;
pub mod ui;
pub mod util;

pub use error::{Error, Result};
