//! Error types for the reconciler runtime.

/// The result type used throughout slc-runtime.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in runtime operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connecting to the event stream failed.
    #[error("stream connect error: {message}")]
    StreamConnect {
        /// Description of the connection failure.
        message: String,
    },

    /// Publishing to the event stream failed.
    #[error("stream publish error on {subject}: {message}")]
    StreamPublish {
        /// The subject the publish targeted.
        subject: String,
        /// Description of the publish failure.
        message: String,
    },

    /// An orchestration API call failed.
    #[error("orchestration error: {message}")]
    Orchestration {
        /// Description of the orchestration failure.
        message: String,
    },

    /// Invalid runtime configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// The CloudEvents HTTP receiver failed.
    #[error("receiver error: {message}")]
    Receiver {
        /// Description of the receiver failure.
        message: String,
    },

    /// Network authentication failed.
    #[error("network auth error: {message}")]
    Network {
        /// Description of the authentication failure.
        message: String,
    },

    /// A filesystem operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from the contract domain.
    #[error(transparent)]
    Core(#[from] slc_core::Error),
}

impl Error {
    /// Creates a new stream connect error.
    #[must_use]
    pub fn stream_connect(message: impl Into<String>) -> Self {
        Self::StreamConnect {
            message: message.into(),
        }
    }

    /// Creates a new stream publish error.
    #[must_use]
    pub fn stream_publish(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StreamPublish {
            subject: subject.into(),
            message: message.into(),
        }
    }

    /// Creates a new orchestration error.
    #[must_use]
    pub fn orchestration(message: impl Into<String>) -> Self {
        Self::Orchestration {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new receiver error.
    #[must_use]
    pub fn receiver(message: impl Into<String>) -> Self {
        Self::Receiver {
            message: message.into(),
        }
    }

    /// Creates a new network auth error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }
}
