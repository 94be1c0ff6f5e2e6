//! Notification dispatch interface.
//!
//! Delivery itself belongs to the embedding application. The engine calls
//! it for `notify` actions and the deadline scheduler calls it for reminders.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A notification delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Chat,
    InApp,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Email => f.write_str("email"),
            Self::Chat => f.write_str("chat"),
            Self::InApp => f.write_str("in_app"),
        }
    }
}

/// Errors returned by a notification dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The channel is not configured in this deployment.
    ChannelUnavailable { channel: Channel },
    /// The recipient could not be resolved on the channel.
    InvalidRecipient { channel: Channel, recipient: String },
    /// Delivery was attempted and failed.
    DeliveryFailed { channel: Channel, reason: String },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelUnavailable { channel } => write!(f, "channel {channel} is unavailable"),
            Self::InvalidRecipient { channel, recipient } => {
                write!(f, "invalid recipient '{recipient}' for channel {channel}")
            }
            Self::DeliveryFailed { channel, reason } => {
                write!(f, "delivery over {channel} failed: {reason}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

/// Sends notifications over a channel.
#[async_trait]
pub trait NotificationDispatch: Send + Sync {
    /// Delivers `message` to `recipient` over `channel`.
    async fn send(
        &self,
        channel: Channel,
        recipient: &str,
        message: &str,
    ) -> Result<(), DispatchError>;
}
