//! Error types for heartbeat-core

use std::fmt::Write;
use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a suggested command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for heartbeat-core
#[derive(Error, Debug)]
pub enum Error {
    /// Sample log store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Identity registry errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Baseline phase transition errors
    #[error("Baseline error: {0}")]
    Phase(#[from] PhaseError),

    /// Aggregation cycle failures
    #[error("Aggregation error: {0}")]
    Aggregate(#[from] AggregateError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Rejected inbound sample (non-finite value, empty identity)
    #[error("Invalid sample: {0}")]
    InvalidSample(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Runtime errors (task joins, closed channels)
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Store(err) => Some(err.remediation()),
            Self::Registry(err) => Some(err.remediation()),
            Self::Phase(err) => Some(err.remediation()),
            Self::Aggregate(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::InvalidSample(_) => Some(
                Remediation::new("Send a finite numeric value from a named identity.")
                    .command(
                        "Example",
                        r#"{"type":"sample-ingest","identity":"p1","value":72}"#,
                    )
                    .alternative("Join with a non-empty identity before sending samples."),
            ),
            Self::Io(_) => Some(
                Remediation::new("Check filesystem permissions and paths, then retry.")
                    .command("Validate config", "heartbeat check-config --config heartbeat.toml")
                    .alternative("Verify the database directory exists and is writable."),
            ),
            Self::Json(_) => Some(
                Remediation::new("Validate the JSON input and retry.")
                    .command("Validate JSON", "python -m json.tool < input.json")
                    .alternative("Send exactly one JSON object per line."),
            ),
            Self::Runtime(_) => Some(
                Remediation::new("Restart the hub or retry the command.")
                    .command("Restart", "heartbeat serve --config heartbeat.toml")
                    .alternative("Run with RUST_LOG=heartbeat_core=debug for details."),
            ),
        }
    }
}

/// Sample log store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt record for identity {identity}: {details}")]
    Corruption { identity: String, details: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store task failed: {0}")]
    TaskJoin(String),
}

impl StoreError {
    /// Whether retrying the same operation on the next tick can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Unavailable(_) | Self::TaskJoin(_)
        )
    }

    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Database(_) => Remediation::new(
                "Database operation failed. Check the database path permissions and retry.",
            )
            .command("Validate config", "heartbeat check-config --config heartbeat.toml")
            .alternative("Ensure the database directory is writable."),
            Self::Corruption { identity, .. } => Remediation::new(format!(
                "Stored samples for {identity} could not be decoded."
            ))
            .command(
                "Inspect log",
                format!("heartbeat dump --db heartbeat.db --identity {identity}"),
            )
            .alternative("Delete the database file and restart with fresh data."),
            Self::Unavailable(_) => Remediation::new(
                "The sample store is unavailable. The next aggregation tick retries.",
            )
            .command("Validate config", "heartbeat check-config --config heartbeat.toml")
            .alternative("Switch to the memory backend with --memory."),
            Self::TaskJoin(_) => Remediation::new("A store task failed to complete. Retry.")
                .command("Restart", "heartbeat serve --config heartbeat.toml")
                .alternative("Run with RUST_LOG=heartbeat_core=debug for details."),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Identity registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),

    #[error("Identity name must not be empty")]
    EmptyIdentity,

    #[error("Cursor {cursor} for {identity} is beyond log length {length}")]
    CursorBeyondLength {
        identity: String,
        cursor: u64,
        length: u64,
    },
}

impl RegistryError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::UnknownIdentity(name) => Remediation::new(format!(
                "Identity {name} is not registered. Join or send a sample first."
            ))
            .command(
                "Join",
                format!(r#"{{"type":"identity-join","identity":"{name}"}}"#),
            ),
            Self::EmptyIdentity => Remediation::new("Use a non-empty identity name.").command(
                "Join",
                r#"{"type":"identity-join","identity":"p1"}"#,
            ),
            Self::CursorBeyondLength { identity, .. } => Remediation::new(format!(
                "Read cursor for {identity} ran ahead of its log. Reset the store."
            ))
            .command("Reset", r#"{"type":"store-reset"}"#)
            .alternative("Restart the hub to rebuild registry state."),
        }
    }
}

/// Baseline phase transition errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhaseError {
    #[error("Cannot {action} while baseline is {phase}")]
    InvalidTransition {
        action: &'static str,
        phase: &'static str,
    },
}

impl PhaseError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::InvalidTransition { .. } => Remediation::new(
                "Baseline events must follow start -> end. Reset to start over.",
            )
            .command("Reset", r#"{"type":"baseline-reset"}"#)
            .command("Query", r#"{"type":"baseline-query"}"#),
        }
    }
}

/// Why an aggregation cycle was abandoned.
///
/// None of these advance cursors; the next trigger starts from the same
/// registry state.
#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("An aggregation cycle is already in flight")]
    InProgress,

    #[error("Range read for {identity} failed: {source}")]
    Store {
        identity: String,
        #[source]
        source: StoreError,
    },

    #[error("Short reply for {identity}: expected {expected} samples, got {actual}")]
    ShortReply {
        identity: String,
        expected: u64,
        actual: u64,
    },

    #[error("Fan-in deadline passed with {received} of {expected} replies")]
    FanInTimeout { expected: usize, received: usize },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl AggregateError {
    /// Short machine-readable reason carried by `cycle-failed` events.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Store { .. } => "store_error",
            Self::ShortReply { .. } => "short_reply",
            Self::FanInTimeout { .. } => "fan_in_timeout",
            Self::Registry(_) => "registry_error",
        }
    }

    /// Whether the next scheduled trigger can be expected to succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InProgress | Self::FanInTimeout { .. } => true,
            Self::Store { source, .. } => source.is_retryable(),
            Self::ShortReply { .. } | Self::Registry(_) => false,
        }
    }

    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::InProgress => Remediation::new(
                "A cycle was still running. The trigger was dropped; the next tick retries.",
            )
            .command("Slow the ticker", "heartbeat serve --interval-ms 5000"),
            Self::Store { source, .. } => source.remediation(),
            Self::ShortReply { identity, .. } => Remediation::new(format!(
                "The store returned fewer samples for {identity} than its length promised."
            ))
            .command(
                "Inspect log",
                format!("heartbeat dump --db heartbeat.db --identity {identity}"),
            )
            .alternative("Reset the store if the log was modified externally."),
            Self::FanInTimeout { .. } => Remediation::new(
                "Range reads did not finish before the fan-in deadline.",
            )
            .command("Raise the deadline", "set aggregation.fan_in_timeout_ms in heartbeat.toml")
            .alternative("Check the store for lock contention."),
            Self::Registry(err) => err.remediation(),
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Failed to serialize config: {0}")]
    SerializeFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => Remediation::new(format!(
                "Config file not found: {path}. Verify the path and retry."
            ))
            .command("Check path", format!("ls -l \"{path}\""))
            .alternative("Pass --config with the correct path."),
            Self::ReadFailed(path, _) => Remediation::new(format!(
                "Failed to read config file: {path}. Check permissions."
            ))
            .command("Check permissions", format!("ls -l \"{path}\""))
            .alternative("Ensure the file is readable by the current user."),
            Self::ParseFailed(_) => {
                Remediation::new("Config parse failed. Fix the TOML syntax and retry.")
                    .command("Validate", "heartbeat check-config --config heartbeat.toml")
                    .alternative("Start from the defaults printed by check-config.")
            }
            Self::SerializeFailed(_) => {
                Remediation::new("Failed to serialize configuration. Check config values.")
                    .command("Validate", "heartbeat check-config --config heartbeat.toml")
                    .alternative("Recreate the config from known-good defaults.")
            }
            Self::ValidationError(_) => {
                Remediation::new("Config validation failed. Fix the invalid fields and retry.")
                    .command("Validate", "heartbeat check-config --config heartbeat.toml")
                    .alternative("Review validation errors and adjust heartbeat.toml.")
            }
        }
    }
}

/// Format an error with remediation guidance for display.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}
