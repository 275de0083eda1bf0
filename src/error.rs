use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Scorer error: {0}")]
    Scorer(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Illegal mission transition: {0}")]
    Mission(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_collaborator() {
        let err = Error::Scorer("timeout".to_string());
        assert_eq!(err.to_string(), "Scorer error: timeout");

        let err = Error::Mission("deploy from Idle".to_string());
        assert_eq!(err.to_string(), "Illegal mission transition: deploy from Idle");
    }

    #[test]
    fn io_errors_convert() {
        fn fails() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(Error::Io(_))));
    }
}
