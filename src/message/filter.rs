//! Message filters.
//!
//! A filter is a pure, cheap predicate over a message's identifying
//! attributes (network and subtype). It is evaluated once per registered
//! callback per received message.

use crate::message::Message;
use crate::protocol::command::Command;
use crate::protocol::network::NetId;

/// Predicate selecting a subset of messages.
///
/// The default filter matches every message. Narrower filters constrain the
/// network, the Main51 command subtype, or both.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    /// Match only messages from this network.
    pub network: Option<NetId>,
    /// Match only Main51 messages echoing this command.
    pub command: Option<Command>,
}

impl MessageFilter {
    /// Creates a filter matching every message.
    #[must_use]
    pub const fn any() -> Self {
        Self {
            network: None,
            command: None,
        }
    }

    /// Creates a filter matching messages from one network.
    #[must_use]
    pub const fn network(network: NetId) -> Self {
        Self {
            network: Some(network),
            command: None,
        }
    }

    /// Creates a filter matching Main51 responses to one command.
    #[must_use]
    pub const fn main51(command: Command) -> Self {
        Self {
            network: Some(NetId::Main51),
            command: Some(command),
        }
    }

    /// Checks whether a message matches this filter.
    #[must_use]
    pub fn matches(&self, message: &Message) -> bool {
        if let Some(network) = self.network {
            if message.network != network {
                return false;
            }
        }

        if let Some(command) = self.command {
            if message.subtype() != Some(command as u8) {
                return false;
            }
        }

        true
    }
}
