use reqwest::Client;

use crate::error::{Error, Result};

pub const DEFAULT_USER_AGENT: &str = concat!("prdl/", env!("CARGO_PKG_VERSION"));

/// User agent injected by the netdisk profile. The provider rejects
/// requests that do not look like its own client.
pub const NETDISK_USER_AGENT: &str = "pan.baidu.com";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Default,
    Netdisk,
}

impl Profile {
    pub fn user_agent(self) -> &'static str {
        match self {
            Profile::Default => DEFAULT_USER_AGENT,
            Profile::Netdisk => NETDISK_USER_AGENT,
        }
    }
}

/// Transport settings fixed for the lifetime of one task.
///
/// Built into a [`Client`] once and shared by the prober and every segment
/// worker; nothing mutates it after the task starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    /// Accept self-signed or otherwise invalid certificates.
    pub skip_tls_verify: bool,
    pub profile: Profile,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            skip_tls_verify: true,
            profile: Profile::Default,
        }
    }
}

impl TransportConfig {
    pub fn build_client(&self, url: &str) -> Result<Client> {
        // No request timeout: a stalled segment waits until the process is stopped.
        Client::builder()
            .user_agent(self.profile.user_agent())
            .danger_accept_invalid_certs(self.skip_tls_verify)
            .build()
            .map_err(|source| Error::Probe {
                url: url.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_verification_is_skipped_by_default() {
        let config = TransportConfig::default();
        assert!(config.skip_tls_verify);
        assert_eq!(config.profile, Profile::Default);
    }

    #[test]
    fn netdisk_profile_swaps_user_agent() {
        assert_eq!(Profile::Netdisk.user_agent(), NETDISK_USER_AGENT);
        assert!(Profile::Default.user_agent().starts_with("prdl/"));
    }
}
