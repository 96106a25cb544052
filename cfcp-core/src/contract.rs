//! # contract: seams between the orchestrator and the outside world
//!
//! The [`Platform`] trait is what the copier needs from Cloud Foundry, the
//! [`Transport`] trait is how bytes reach an instance. Both are implemented by
//! real clients and by `mockall` mocks in tests.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use zeroize::Zeroizing;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::error::{PlatformError, TransferError};
use crate::platform::{PlatformInfo, SessionTarget};

/// A single-use SSH authentication code minted by `cf ssh-code`.
///
/// The code is wiped from memory on drop and redacted from `Debug` output.
/// Mint one right before a transfer attempt and never keep it around.
pub struct AuthCode(Zeroizing<String>);

impl AuthCode {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self(Zeroizing::new(raw.trim().to_owned()))
    }

    /// The code as it must be presented to the SSH proxy.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for AuthCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthCode(<redacted>)")
    }
}

/// Where one application instance is reached over SSH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceAddress {
    pub app_guid: String,
    pub index: u32,
    pub host: String,
    pub port: u16,
    /// Fingerprint the SSH proxy must present, when verification is enabled.
    pub host_key_fingerprint: Option<String>,
}

impl InstanceAddress {
    /// The SSH username the Cloud Foundry proxy routes on: `cf:<guid>/<index>`.
    pub fn user(&self) -> String {
        format!("cf:{}/{}", self.app_guid, self.index)
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for InstanceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user(), self.host, self.port)
    }
}

/// Everything the copier asks of the platform.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Platform: Send + Sync {
    /// The logged-in session's API endpoint, org, space and user.
    async fn session_target(&self) -> Result<SessionTarget, PlatformError>;

    /// The `/v2/info` metadata document.
    async fn platform_info(&self) -> Result<PlatformInfo, PlatformError>;

    /// The unique identifier of the named application.
    async fn app_guid(&self, app_name: &str) -> Result<String, PlatformError>;

    /// How many instances of the application exist.
    async fn instance_count(&self, app_name: &str, app_guid: &str)
        -> Result<u32, PlatformError>;

    /// Mint a fresh one-time SSH code. Errors are returned as produced.
    async fn generate_auth_code(&self) -> Result<AuthCode, PlatformError>;
}

/// Moves one local file onto one application instance.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Copy `source` to the absolute path `target` inside the instance at `address`,
    /// authenticating with `code` as the password.
    async fn copy_file(
        &self,
        address: &InstanceAddress,
        source: &Path,
        target: &str,
        code: &AuthCode,
    ) -> Result<(), TransferError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_code_is_trimmed_and_redacted() {
        let code = AuthCode::new("  abc123\n");
        assert_eq!(code.expose(), "abc123");
        assert_eq!(format!("{code:?}"), "AuthCode(<redacted>)");
    }

    #[test]
    fn instance_address_renders_proxy_user() {
        let address = InstanceAddress {
            app_guid: "9775c4e8-1ea6-4080-ab45-059e7e640310".into(),
            index: 1,
            host: "ssh.example.com".into(),
            port: 2222,
            host_key_fingerprint: None,
        };
        assert_eq!(address.user(), "cf:9775c4e8-1ea6-4080-ab45-059e7e640310/1");
        assert_eq!(address.endpoint(), "ssh.example.com:2222");
        assert_eq!(
            address.to_string(),
            "cf:9775c4e8-1ea6-4080-ab45-059e7e640310/1@ssh.example.com:2222"
        );
    }
}
