//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and exit codes.

use std::fmt;
use std::process;

use tilecache::config::ConfigFileError;
use tilecache::coordinator::CoordinatorError;
use tilecache::fetcher::FetchError;
use tilecache::store::StoreError;
use tilecache::AppError;

/// CLI-specific errors.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(std::io::Error),
    /// Invalid command-line argument
    InvalidArgument(String),
    /// Configuration file could not be loaded
    Config(ConfigFileError),
    /// Disk cache operation failed
    Cache(StoreError),
    /// Fetcher could not be created
    Fetcher(FetchError),
    /// Engine failed to start
    Startup(AppError),
    /// Coordinator stopped unexpectedly
    Coordinator(CoordinatorError),
    /// Failed to create the Tokio runtime
    Runtime(std::io::Error),
    /// Some tiles could not be fetched
    TilesFailed { failed: usize, total: usize },
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::InvalidArgument(_) => 2,
            CliError::TilesFailed { .. } => 3,
            _ => 1,
        }
    }

    /// Exit the process with an error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Fetcher(FetchError::InvalidTemplate(_)) = self {
            eprintln!();
            eprintln!("URL templates may use {{provider}}, {{map_id}}, {{z}}, {{x}}, {{y}} and {{version}},");
            eprintln!("for example: https://tile.example.com/{{z}}/{{x}}/{{y}}.png");
        }

        process::exit(self.exit_code())
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            CliError::Config(e) => write!(f, "{}", e),
            CliError::Cache(e) => write!(f, "Disk cache error: {}", e),
            CliError::Fetcher(e) => write!(f, "{}", e),
            CliError::Startup(e) => write!(f, "Failed to start tile cache: {}", e),
            CliError::Coordinator(e) => write!(f, "{}", e),
            CliError::Runtime(e) => write!(f, "Failed to create Tokio runtime: {}", e),
            CliError::TilesFailed { failed, total } => {
                write!(f, "{} of {} tiles could not be fetched", failed, total)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::LoggingInit(e) | CliError::Runtime(e) => Some(e),
            CliError::Config(e) => Some(e),
            CliError::Cache(e) => Some(e),
            CliError::Fetcher(e) => Some(e),
            CliError::Startup(e) => Some(e),
            CliError::Coordinator(e) => Some(e),
            CliError::InvalidArgument(_) | CliError::TilesFailed { .. } => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        CliError::Cache(e)
    }
}

impl From<FetchError> for CliError {
    fn from(e: FetchError) -> Self {
        CliError::Fetcher(e)
    }
}

impl From<AppError> for CliError {
    fn from(e: AppError) -> Self {
        CliError::Startup(e)
    }
}

impl From<CoordinatorError> for CliError {
    fn from(e: CoordinatorError) -> Self {
        CliError::Coordinator(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = CliError::TilesFailed {
            failed: 2,
            total: 9,
        };
        assert_eq!(err.to_string(), "2 of 9 tiles could not be fetched");
        assert_eq!(err.exit_code(), 3);

        let err = CliError::InvalidArgument("bad range".to_string());
        assert!(err.to_string().contains("bad range"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_from_coordinator_error() {
        let err: CliError = CoordinatorError::ShuttingDown.into();
        assert!(matches!(err, CliError::Coordinator(_)));
        assert_eq!(err.exit_code(), 1);
    }
}
