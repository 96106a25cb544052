//! High-level orchestration: copy one local file onto every instance of an app.
//!
//! [`Copier::new`] resolves everything that stays fixed for the lifetime of a
//! copier (session, SSH proxy endpoint, app guid). [`Copier::copy`] then runs
//! one copy job:
//!
//! 1. normalise the target to an absolute path
//! 2. stat the source; directories are rejected
//! 3. apply the exclusion filter (an excluded file is a successful no-op)
//! 4. enumerate the app's instances
//! 5. in a simulated run, report what would be copied and stop
//! 6. transfer to all instances concurrently, each attempt minting its own
//!    one-time code right before it connects
//! 7. retry instances that rejected their code once, each with a fresh code
//!
//! Per-instance failures never abort the other instances; they are collected
//! and returned together as [`CopyError::Transfer`]. When no instance could
//! get a code at all the copy fails with [`CopyError::CannotAuthenticate`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::contract::{InstanceAddress, Platform, Transport};
use crate::error::{CopyError, InstanceFailure, TransferError};
use crate::exclude::is_excluded;
use crate::platform::SshEndpoint;

/// Default upper bound for one instance transfer.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration for a [`Copier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopierConfig {
    pub app_name: String,
    /// Report planned transfers instead of performing them.
    pub simulated: bool,
    pub transfer_timeout: Duration,
    /// Pin the SSH proxy host key to the fingerprint published in `/v2/info`.
    pub verify_host_key: bool,
}

impl CopierConfig {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            simulated: false,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            verify_host_key: true,
        }
    }
}

/// One transfer a simulated run would have performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTransfer {
    pub source: PathBuf,
    pub target: String,
    pub address: InstanceAddress,
}

impl fmt::Display for PlannedTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "would copy {} -> {}:{}",
            self.source.display(),
            self.address,
            self.target
        )
    }
}

/// Outcome of a successful [`Copier::copy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyReport {
    /// The source matched an exclusion pattern; nothing was done.
    Excluded { source: PathBuf, pattern: String },
    Simulated { planned: Vec<PlannedTransfer> },
    Copied {
        source: PathBuf,
        target: String,
        instances: Vec<u32>,
    },
}

/// Prefix `/` when the remote target isn't absolute.
pub fn normalize_target(target: &str) -> String {
    if target.starts_with('/') {
        target.to_owned()
    } else {
        warn!(remote_path = target, "Target path for secure copy must be absolute, prefixing /");
        format!("/{target}")
    }
}

/// Copies files from the local filesystem into application instance containers.
pub struct Copier<P, T> {
    config: CopierConfig,
    platform: P,
    transport: T,
    app_guid: String,
    ssh: SshEndpoint,
    host_key_fingerprint: Option<String>,
}

impl<P: Platform, T: Transport> Copier<P, T> {
    /// Check the login session and resolve the SSH endpoint and app guid.
    pub async fn new(config: CopierConfig, platform: P, transport: T) -> Result<Self, CopyError> {
        let session = platform.session_target().await?;
        info!(
            api = %session.api_endpoint,
            org = %session.org,
            space = %session.space,
            user = %session.user,
            "Using cf session"
        );

        let platform_info = platform.platform_info().await?;
        let ssh = platform_info.ssh_endpoint()?;
        info!(ssh_endpoint = %ssh, api_version = %platform_info.api_version, "Resolved SSH endpoint");

        let host_key_fingerprint = if config.verify_host_key {
            platform_info.host_key_fingerprint().map(str::to_owned)
        } else {
            None
        };

        let app_guid = platform.app_guid(&config.app_name).await?;
        info!(app = %config.app_name, guid = %app_guid, "Resolved app guid");

        Ok(Self {
            config,
            platform,
            transport,
            app_guid,
            ssh,
            host_key_fingerprint,
        })
    }

    pub fn config(&self) -> &CopierConfig {
        &self.config
    }

    pub fn ssh_endpoint(&self) -> &SshEndpoint {
        &self.ssh
    }

    pub fn app_guid(&self) -> &str {
        &self.app_guid
    }

    /// Copy `source` to `target` on every instance, unless excluded.
    pub async fn copy(
        &self,
        source: impl AsRef<Path>,
        target: &str,
        excludes: &[String],
    ) -> Result<CopyReport, CopyError> {
        let source = source.as_ref();
        let target = normalize_target(target);

        let meta = tokio::fs::metadata(source)
            .await
            .map_err(|e| CopyError::Io {
                path: source.to_path_buf(),
                source: e,
            })?;
        if meta.is_dir() {
            return Err(CopyError::NotImplemented(format!(
                "directory copy of {}",
                source.display()
            )));
        }

        self.copy_file(source, &target, excludes).await
    }

    async fn copy_file(
        &self,
        source: &Path,
        target: &str,
        excludes: &[String],
    ) -> Result<CopyReport, CopyError> {
        if let Some(pattern) = is_excluded(&source.to_string_lossy(), excludes) {
            info!(source = %source.display(), pattern, "Excluded from copy");
            return Ok(CopyReport::Excluded {
                source: source.to_path_buf(),
                pattern: pattern.to_owned(),
            });
        }

        let count = self
            .platform
            .instance_count(&self.config.app_name, &self.app_guid)
            .await?;
        let addresses: Vec<InstanceAddress> = (0..count).map(|i| self.address(i)).collect();

        if self.config.simulated {
            let planned: Vec<PlannedTransfer> = addresses
                .into_iter()
                .map(|address| PlannedTransfer {
                    source: source.to_path_buf(),
                    target: target.to_owned(),
                    address,
                })
                .collect();
            for plan in &planned {
                info!(%plan, "Simulated transfer");
            }
            return Ok(CopyReport::Simulated { planned });
        }

        info!(source = %source.display(), remote_path = target, instances = count, "Copying");
        let failures = self.transfer_all(&addresses, source, target).await;

        let (rejected, mut failures): (Vec<_>, Vec<_>) =
            failures.into_iter().partition(|f| f.error.is_auth_rejected());
        if !rejected.is_empty() {
            failures.extend(self.retry_rejected(rejected, &addresses, source, target).await);
        }
        failures.sort_by_key(|f| f.index);

        let none_authenticated = !failures.is_empty()
            && failures.len() == addresses.len()
            && failures.iter().all(|f| f.error.is_code_unavailable());
        if none_authenticated {
            if let TransferError::CodeUnavailable(cause) = failures.swap_remove(0).error {
                return Err(CopyError::CannotAuthenticate(cause));
            }
        }

        if failures.is_empty() {
            Ok(CopyReport::Copied {
                source: source.to_path_buf(),
                target: target.to_owned(),
                instances: (0..count).collect(),
            })
        } else {
            for failure in &failures {
                warn!(instance = failure.index, error = %failure.error, "Instance copy failed");
            }
            Err(CopyError::Transfer { failures })
        }
    }

    /// One more attempt for instances that rejected their first code.
    async fn retry_rejected(
        &self,
        rejected: Vec<InstanceFailure>,
        addresses: &[InstanceAddress],
        source: &Path,
        target: &str,
    ) -> Vec<InstanceFailure> {
        warn!(
            instances = ?rejected.iter().map(|f| f.index).collect::<Vec<_>>(),
            "Auth code rejected, retrying once with fresh codes"
        );
        let retry: Vec<InstanceAddress> = addresses
            .iter()
            .filter(|a| rejected.iter().any(|f| f.index == a.index))
            .cloned()
            .collect();
        self.transfer_all(&retry, source, target).await
    }

    async fn transfer_all(
        &self,
        addresses: &[InstanceAddress],
        source: &Path,
        target: &str,
    ) -> Vec<InstanceFailure> {
        let timeout = self.config.transfer_timeout;
        let attempts = addresses.iter().map(|address| async move {
            let result = tokio::time::timeout(timeout, self.transfer_one(address, source, target))
                .await
                .unwrap_or_else(|_| Err(TransferError::Timeout { after: timeout }));
            (address.index, result)
        });
        join_all(attempts)
            .await
            .into_iter()
            .filter_map(|(index, result)| result.err().map(|error| InstanceFailure { index, error }))
            .collect()
    }

    /// Codes are single use: every attempt mints its own and drops it afterwards.
    async fn transfer_one(
        &self,
        address: &InstanceAddress,
        source: &Path,
        target: &str,
    ) -> Result<(), TransferError> {
        let code = self
            .platform
            .generate_auth_code()
            .await
            .map_err(TransferError::CodeUnavailable)?;
        debug!(instance = %address, "Minted auth code");
        self.transport.copy_file(address, source, target, &code).await
    }

    fn address(&self, index: u32) -> InstanceAddress {
        InstanceAddress {
            app_guid: self.app_guid.clone(),
            index,
            host: self.ssh.host.clone(),
            port: self.ssh.port,
            host_key_fingerprint: self.host_key_fingerprint.clone(),
        }
    }
}
