//! Command messages carried by the durable command queue.

use bytes::Bytes;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The commands a worker knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    /// Transition an auction from open to closed.
    CloseAuction,
    /// Deactivate a user and drop their cached profile.
    DeleteUser,
    /// Rewrite a deleted user's display name in bids and questions.
    ScrubUser,
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandKind::CloseAuction => write!(f, "close-auction"),
            CommandKind::DeleteUser => write!(f, "delete-user"),
            CommandKind::ScrubUser => write!(f, "scrub-user"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandDecodeError {
    #[error("invalid command json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("command {0} has an empty target id")]
    EmptyTarget(CommandKind),
}

/// `{"command": "...", "targetId": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMessage {
    pub command: CommandKind,
    pub target_id: CompactString,
}

impl CommandMessage {
    pub fn close_auction(auction_id: impl Into<CompactString>) -> Self {
        Self {
            command: CommandKind::CloseAuction,
            target_id: auction_id.into(),
        }
    }

    pub fn delete_user(user_id: impl Into<CompactString>) -> Self {
        Self {
            command: CommandKind::DeleteUser,
            target_id: user_id.into(),
        }
    }

    pub fn scrub_user(user_id: impl Into<CompactString>) -> Self {
        Self {
            command: CommandKind::ScrubUser,
            target_id: user_id.into(),
        }
    }

    /// Parse a queue message body.
    pub fn from_slice(body: &[u8]) -> Result<Self, CommandDecodeError> {
        let message: CommandMessage = serde_json::from_slice(body)?;
        if message.target_id.trim().is_empty() {
            return Err(CommandDecodeError::EmptyTarget(message.command));
        }
        Ok(message)
    }

    /// Serialize into a queue message body.
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let message = CommandMessage::close_auction("a-42");
        let body = message.to_bytes().unwrap();
        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            r#"{"command":"close-auction","targetId":"a-42"}"#
        );
        assert_eq!(CommandMessage::from_slice(&body).unwrap(), message);
    }

    #[test]
    fn test_rejects_unknown_command() {
        let err = CommandMessage::from_slice(br#"{"command":"explode","targetId":"x"}"#);
        assert!(matches!(err, Err(CommandDecodeError::Json(_))));
    }

    #[test]
    fn test_rejects_blank_target() {
        let err = CommandMessage::from_slice(br#"{"command":"delete-user","targetId":"  "}"#);
        assert!(matches!(
            err,
            Err(CommandDecodeError::EmptyTarget(CommandKind::DeleteUser))
        ));
    }
}
