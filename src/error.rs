use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum BridgeError {
    #[error("GPIO pin {pin} unavailable: {reason}")]
    GpioUnavailable { pin: u32, reason: String },

    #[error("GPIO pin {pin} I/O error: {source}")]
    Gpio {
        pin: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Sample command `{command}` failed: {reason}")]
    SampleCommand { command: String, reason: String },

    #[error("Sample command `{command}` produced non-numeric output {output:?}")]
    MalformedSample { command: String, output: String },

    #[error("Commissioning configuration rejected: {0}")]
    Commissioning(String),

    #[error("Node failed to start: {0}")]
    NodeStartFailed(String),

    #[error("Node is offline")]
    NodeOffline,

    #[error("Endpoint {0} already registered")]
    DuplicateEndpoint(String),

    #[error("Attribute {path} does not accept {value}")]
    UnsupportedAttribute { path: String, value: String },

    #[error("An input source is already active")]
    SourceAlreadyActive,

    #[error("Another instance is already running for node {0}")]
    AlreadyRunning(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    #[error(transparent)]
    NixError(#[from] nix::Error),

    #[error(transparent)]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl BridgeError {
    /// Whether the error indicates a setup defect that must terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SampleCommand { .. }
                | Self::MalformedSample { .. }
                | Self::Commissioning(_)
                | Self::NodeStartFailed(_)
                | Self::AlreadyRunning(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let err = BridgeError::MalformedSample {
            command: "cat temp".into(),
            output: "n/a".into(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("\"n/a\""));

        assert!(!BridgeError::NodeOffline.is_fatal());
        assert!(
            !BridgeError::GpioUnavailable {
                pin: 17,
                reason: "no sysfs".into()
            }
            .is_fatal()
        );
    }
}
