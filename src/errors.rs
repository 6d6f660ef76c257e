use thiserror::Error;

/// Errors that can occur in the IP failover controller
#[derive(Error, Debug)]
pub enum FailoverError {
    /// Interface could not be found
    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    /// Interface exists but could not be brought administratively up
    #[error("Interface {0} is down and could not be brought up")]
    LinkDown(String),

    /// Command execution failed
    #[error("Failed to execute command: {0}")]
    CommandExecution(String),

    /// External command did not finish in time and was killed
    #[error("Command timed out: {0}")]
    CommandTimeout(String),

    /// Transmit counter for the interface could not be read
    #[error("Interface statistics unavailable: {0}")]
    CounterUnavailable(String),

    /// Connectivity probes could not be dispatched
    #[error("Connectivity probe failed: {0}")]
    Probe(String),

    /// Configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Insufficient permissions
    #[error("Insufficient permissions (try running as root)")]
    InsufficientPermissions,

    /// IO error
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

/// Shorthand result type for failover operations
pub type FailoverResult<T> = Result<T, FailoverError>;

