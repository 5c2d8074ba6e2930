//! Reasons attached to broker-initiated closes.
//!
//! When the broker ends a connection it first sends a close frame carrying a
//! numeric code and a short human-readable reason.  Peers key their error
//! handling off the reason text, so the strings below are part of the wire
//! protocol and must not change.

use std::fmt;

/// RFC 6455 close code 1001: endpoint is going away.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// RFC 6455 close code 1008: message violated endpoint policy.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Why the broker is closing a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Out-of-order or repeated setup, malformed envelope, bad pairing request.
    ProtocolError,
    /// Space or server password did not match.
    PasswordError,
    /// Setup named an unknown role, or no setup arrived in time.
    InvalidType,
    /// A server tried to register without a display name.
    MissingServerName,
    /// A server tried to register under a name already taken in the space.
    DuplicateServerName,
    /// The space is shutting down; carries the operator-supplied message.
    GoingAway(String),
}

impl CloseReason {
    /// The reason text sent in the close frame.
    pub fn as_str(&self) -> &str {
        match self {
            CloseReason::ProtocolError => "protocol error",
            CloseReason::PasswordError => "password error",
            CloseReason::InvalidType => "invalid type",
            CloseReason::MissingServerName => "server connections need a name",
            CloseReason::DuplicateServerName => "server name already in use",
            CloseReason::GoingAway(message) => message,
        }
    }

    /// The close code sent in the close frame.
    pub fn code(&self) -> u16 {
        match self {
            CloseReason::GoingAway(_) => CLOSE_GOING_AWAY,
            _ => CLOSE_POLICY_VIOLATION,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_strings_match_protocol() {
        assert_eq!(CloseReason::ProtocolError.as_str(), "protocol error");
        assert_eq!(CloseReason::PasswordError.as_str(), "password error");
        assert_eq!(CloseReason::InvalidType.as_str(), "invalid type");
        assert_eq!(
            CloseReason::MissingServerName.as_str(),
            "server connections need a name"
        );
    }

    #[test]
    fn test_going_away_carries_message_and_code_1001() {
        let reason = CloseReason::GoingAway("server is shutting down".to_string());
        assert_eq!(reason.to_string(), "server is shutting down");
        assert_eq!(reason.code(), CLOSE_GOING_AWAY);
    }

    #[test]
    fn test_protocol_failures_use_policy_violation_code() {
        assert_eq!(CloseReason::PasswordError.code(), CLOSE_POLICY_VIOLATION);
        assert_eq!(CloseReason::InvalidType.code(), CLOSE_POLICY_VIOLATION);
    }
}
