//! Error types for the context bus

use thiserror::Error;

use crate::{AppId, ChannelId, ListenerId};

/// Core bus errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    // Routing errors
    #[error("Unknown channel: {0}")]
    UnknownChannel(ChannelId),

    #[error("Invalid context: {0}")]
    InvalidContext(String),

    // Delivery errors (recorded, never returned from a broadcast)
    #[error("Listener {listener} owned by {owner} faulted: {reason}")]
    ListenerCallbackFault {
        listener: ListenerId,
        owner: AppId,
        reason: String,
    },

    // Application errors
    #[error("Application {0} is not connected")]
    AppNotConnected(AppId),

    #[error("App not found: {0}")]
    AppNotFound(String),

    #[error("App timed out while launching: {0}")]
    AppTimeout(String),

    #[error("Error on launch of {app}: {reason}")]
    ErrorOnLaunch { app: String, reason: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_subject() {
        let err = BusError::UnknownChannel(ChannelId::new("mauve"));
        assert_eq!(err.to_string(), "Unknown channel: mauve");

        let fault = BusError::ListenerCallbackFault {
            listener: ListenerId::new(3),
            owner: AppId::new(1),
            reason: "boom".into(),
        };
        assert_eq!(
            fault.to_string(),
            "Listener listener-3 owned by app-1 faulted: boom"
        );
    }
}
