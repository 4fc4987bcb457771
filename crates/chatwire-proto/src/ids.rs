//! Identifier types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Conversation identifier assigned by the backend.
pub type ConversationId = String;

/// Message identifier assigned by the backend.
pub type MessageId = String;

/// User identifier.
pub type UserId = u64;

/// Client-generated identifier echoed back by the backend so a subscriber can
/// match an acknowledgement or failure to the request that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}
