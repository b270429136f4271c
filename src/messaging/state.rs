use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a broker session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session; `start` is allowed
    #[default]
    Disconnected,
    /// Connect requested, waiting for the broker acknowledgement
    Connecting,
    /// Session established; subscribe and publish take effect
    Connected,
    /// The broker could not be reached or refused the session; `start` is allowed
    Failed,
}

impl ConnectionState {
    /// Whether a fresh `start` may begin from this state
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }

    /// Whether a session is being established or is established
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Failed, Connecting)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Failed, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ConnectionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnected" => Ok(Self::Disconnected),
            "connecting" => Ok(Self::Connecting),
            "connected" => Ok(Self::Connected),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid connection state: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_start_allowed_only_when_idle() {
        assert!(ConnectionState::Disconnected.can_start());
        assert!(ConnectionState::Failed.can_start());
        assert!(!ConnectionState::Connecting.can_start());
        assert!(!ConnectionState::Connected.can_start());
    }

    #[test]
    fn test_transitions() {
        use ConnectionState::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Failed));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Connected));
    }

    #[test]
    fn test_display_round_trip() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Failed,
        ] {
            assert_eq!(ConnectionState::from_str(&state.to_string()).unwrap(), state);
        }
        assert!(ConnectionState::from_str("reconnecting").is_err());
    }
}
