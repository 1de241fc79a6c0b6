//! Per-channel secrets.
//!
//! Every console session issues one unguessable token per logical channel at
//! construction time. The token map is exposed once, in the session metadata,
//! and is the only way a client learns which token unlocks which channel.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::json;
use std::fmt;

const TOKEN_LEN: usize = 32;

/// Identifier of one websocket channel within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    /// The out-of-band command channel.
    Control,
    /// A terminal data channel. The current configuration uses exactly one,
    /// `Data(0)`, but the registry and table support any number.
    Data(u32),
}

impl ChannelId {
    /// Key under which this channel's secret appears in session metadata.
    pub fn metadata_key(&self) -> String {
        match self {
            ChannelId::Control => "control".to_string(),
            ChannelId::Data(index) => index.to_string(),
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Control => f.write_str("control"),
            ChannelId::Data(index) => write!(f, "{index}"),
        }
    }
}

/// Holds the secret issued for each channel of one session.
pub struct SecretRegistry {
    secrets: Vec<(ChannelId, String)>,
}

impl SecretRegistry {
    /// Issues a fresh secret for the control channel and for `data_channels`
    /// data channels. Secrets are never reused across sessions or channels.
    pub fn new(data_channels: u32) -> Self {
        let mut secrets = Vec::with_capacity(data_channels as usize + 1);
        secrets.push((ChannelId::Control, issue_token()));
        for index in 0..data_channels {
            secrets.push((ChannelId::Data(index), issue_token()));
        }
        Self { secrets }
    }

    /// Linear scan over the registered pairs; `None` means the credential is
    /// wrong (the caller surfaces that as permission denied).
    pub fn lookup(&self, secret: &str) -> Option<ChannelId> {
        self.secrets
            .iter()
            .find(|(_, token)| token == secret)
            .map(|(channel, _)| *channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.secrets.iter().map(|(channel, _)| *channel)
    }

    /// The `{"fds": {...}}` object handed back once at session creation.
    pub fn metadata(&self) -> serde_json::Value {
        let fds: serde_json::Map<String, serde_json::Value> = self
            .secrets
            .iter()
            .map(|(channel, token)| (channel.metadata_key(), json!(token)))
            .collect();
        json!({ "fds": fds })
    }
}

/// 32 bytes of OS randomness, URL-safe base64 without padding.
fn issue_token() -> String {
    let mut bytes = [0u8; TOKEN_LEN];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn issues_one_distinct_secret_per_channel() {
        let registry = SecretRegistry::new(1);
        let channels: Vec<_> = registry.channels().collect();
        assert_eq!(channels, vec![ChannelId::Control, ChannelId::Data(0)]);

        let tokens: HashSet<_> = registry.secrets.iter().map(|(_, t)| t.clone()).collect();
        assert_eq!(tokens.len(), 2, "tokens must be distinct");
    }

    #[test]
    fn secrets_differ_across_sessions() {
        let a = SecretRegistry::new(1);
        let b = SecretRegistry::new(1);
        for (_, token) in &a.secrets {
            assert!(b.lookup(token).is_none());
        }
    }

    #[test]
    fn lookup_matches_the_issuing_channel() {
        let registry = SecretRegistry::new(2);
        for (channel, token) in &registry.secrets {
            assert_eq!(registry.lookup(token), Some(*channel));
        }
        assert_eq!(registry.lookup("not-a-token"), None);
        assert_eq!(registry.lookup(""), None);
    }

    #[test]
    fn metadata_keys_follow_the_wire_format() {
        let registry = SecretRegistry::new(1);
        let metadata = registry.metadata();
        let fds = metadata["fds"].as_object().expect("fds object");
        assert_eq!(fds.len(), 2);
        assert!(fds.contains_key("control"));
        assert!(fds.contains_key("0"));
        assert_eq!(
            fds["0"].as_str().unwrap(),
            registry
                .secrets
                .iter()
                .find(|(c, _)| *c == ChannelId::Data(0))
                .map(|(_, t)| t.as_str())
                .unwrap()
        );
    }
}
