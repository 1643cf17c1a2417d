//! Channel policies and the application-side handler.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::event::InboundEvent;
use crate::ids::ChannelId;

/// Preferred delivery policy of a channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPolicy {
    /// No policy chosen. Not accepted by policy changes.
    NoPolicy,
    /// Binary messages needed (sockets only).
    Binary,
    /// Server to client only (streams only).
    HighSecurity,
    /// Disconnected delivery (polling only).
    Disconnected,
    /// Immediate server to client delivery (sockets and streams).
    ImmediateS2C,
    /// Client to server messages as well (sockets and polling).
    TwoWayMessages,
    /// Running without socket support (streams and polling).
    NoSockets,
    /// Every server to client transport.
    #[default]
    SureDelivery,
}

impl ChannelPolicy {
    /// Wire name of the policy.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoPolicy => "no_policy",
            Self::Binary => "binary",
            Self::HighSecurity => "high_security",
            Self::Disconnected => "disconnected",
            Self::ImmediateS2C => "immediate_s2c",
            Self::TwoWayMessages => "two_way_messages",
            Self::NoSockets => "no_sockets",
            Self::SureDelivery => "sure_delivery",
        }
    }

    /// Whether this is a concrete policy a channel may adopt.
    pub fn is_known(self) -> bool {
        self != Self::NoPolicy
    }
}

impl fmt::Display for ChannelPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "no_policy" => Ok(Self::NoPolicy),
            "binary" => Ok(Self::Binary),
            "high_security" => Ok(Self::HighSecurity),
            "disconnected" => Ok(Self::Disconnected),
            "immediate_s2c" => Ok(Self::ImmediateS2C),
            "two_way_messages" => Ok(Self::TwoWayMessages),
            "no_sockets" => Ok(Self::NoSockets),
            "sure_delivery" => Ok(Self::SureDelivery),
            other => Err(format!("unknown channel policy: {other}")),
        }
    }
}

/// Identity of a channel as seen by its handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Channel id.
    pub id: ChannelId,
    /// Session name the channel was registered under.
    pub session_name: String,
    /// Current policy.
    pub policy: ChannelPolicy,
}

/// Application object attached to a channel.
///
/// Receives client to server events and may veto the continued operation of
/// the channel. Called from the scheduler task without any channel lock held.
pub trait ChannelHandler: Send + Sync {
    /// An inbound event arrived on the channel.
    fn on_event(&self, channel: &ChannelInfo, event: InboundEvent);

    /// Whether the channel is still valid (e.g. the session has not expired).
    fn check_policy(&self, _channel: &ChannelInfo) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_sure_delivery() {
        assert_eq!(ChannelPolicy::default(), ChannelPolicy::SureDelivery);
    }

    #[test]
    fn no_policy_is_not_known() {
        assert!(!ChannelPolicy::NoPolicy.is_known());
        assert!(ChannelPolicy::HighSecurity.is_known());
    }

    #[test]
    fn names_round_trip_through_from_str() {
        for policy in [
            ChannelPolicy::Binary,
            ChannelPolicy::HighSecurity,
            ChannelPolicy::Disconnected,
            ChannelPolicy::ImmediateS2C,
            ChannelPolicy::TwoWayMessages,
            ChannelPolicy::NoSockets,
            ChannelPolicy::SureDelivery,
        ] {
            assert_eq!(policy.as_str().parse::<ChannelPolicy>().unwrap(), policy);
        }
    }

    #[test]
    fn serde_matches_as_str() {
        let json = serde_json::to_string(&ChannelPolicy::ImmediateS2C).unwrap();
        assert_eq!(json, "\"immediate_s2c\"");
    }

    #[test]
    fn default_check_policy_accepts() {
        struct Quiet;
        impl ChannelHandler for Quiet {
            fn on_event(&self, _channel: &ChannelInfo, _event: InboundEvent) {}
        }
        let info = ChannelInfo {
            id: ChannelId::new(1),
            session_name: "s".into(),
            policy: ChannelPolicy::default(),
        };
        assert!(Quiet.check_policy(&info));
    }
}
