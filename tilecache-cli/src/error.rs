//! CLI error handling with user-facing messages.

use std::fmt;

#[derive(Debug)]
pub enum CliError {
    /// Configuration file problems.
    Config(String),
    /// Engine failures while seeding or cleaning.
    Engine(tilecache::Error),
    /// Invalid command-line arguments.
    Usage(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Engine(e) => write!(f, "{e}"),
            Self::Usage(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Engine(e) => Some(e),
            _ => None,
        }
    }
}

impl From<tilecache::Error> for CliError {
    fn from(e: tilecache::Error) -> Self {
        Self::Engine(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_config_error() {
        let err = CliError::Config("missing tileset".to_string());
        assert!(err.to_string().contains("configuration error"));
        assert!(err.to_string().contains("missing tileset"));
    }

    #[test]
    fn test_from_engine_error() {
        let err: CliError = tilecache::Error::NotFound("tile".into()).into();
        assert!(matches!(err, CliError::Engine(_)));
    }
}
