//! Embedded SSH client that authenticates against the Cloud Foundry SSH proxy
//! with a one-time code and drives a remote `scp -t` sink.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use md5::{Digest, Md5};
use russh::client;
use russh::keys::{HashAlg, PublicKey};
use russh::Disconnect;
use tracing::{debug, info, warn};

use super::{send_file, shell_quote, FileHeader};
use crate::contract::{AuthCode, InstanceAddress, Transport};
use crate::error::TransferError;

/// Copies files over an in-process SSH connection, one connection per call.
#[derive(Debug, Clone)]
pub struct SshTransport {
    inactivity_timeout: Duration,
}

impl SshTransport {
    pub fn new(inactivity_timeout: Duration) -> Self {
        Self { inactivity_timeout }
    }
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

struct ProxyHandler {
    expected_fingerprint: Option<String>,
}

impl client::Handler for ProxyHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let Some(expected) = self.expected_fingerprint.as_deref() else {
            return Ok(true);
        };
        let matched = fingerprint_matches(server_public_key, expected);
        if !matched {
            warn!(expected, "SSH proxy host key does not match advertised fingerprint");
        }
        Ok(matched)
    }
}

/// Compare a server key against either a `SHA256:<base64>` or a colon-hex MD5 fingerprint.
fn fingerprint_matches(key: &PublicKey, expected: &str) -> bool {
    let expected = expected.trim();
    if expected.starts_with("SHA256:") {
        return key.fingerprint(HashAlg::Sha256).to_string() == expected;
    }
    match key.to_bytes() {
        Ok(blob) => md5_fingerprint(&blob).eq_ignore_ascii_case(expected),
        Err(_) => false,
    }
}

fn md5_fingerprint(blob: &[u8]) -> String {
    Md5::digest(blob)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[async_trait]
impl Transport for SshTransport {
    async fn copy_file(
        &self,
        address: &InstanceAddress,
        source: &Path,
        target: &str,
        code: &AuthCode,
    ) -> Result<(), TransferError> {
        let header = FileHeader::for_path(source).await?;
        let file = tokio::fs::File::open(source)
            .await
            .map_err(|e| TransferError::Io {
                path: source.to_path_buf(),
                source: e,
            })?;

        let config = Arc::new(client::Config {
            inactivity_timeout: Some(self.inactivity_timeout),
            ..Default::default()
        });
        let handler = ProxyHandler {
            expected_fingerprint: address.host_key_fingerprint.clone(),
        };
        let connect_err = |e: russh::Error| TransferError::Connect {
            endpoint: address.endpoint(),
            reason: match e {
                russh::Error::UnknownKey => {
                    "host key does not match the advertised fingerprint".to_owned()
                }
                other => other.to_string(),
            },
        };

        debug!(instance = %address, "Connecting to SSH proxy");
        let mut session = client::connect(config, (address.host.as_str(), address.port), handler)
            .await
            .map_err(connect_err)?;

        let user = address.user();
        let auth = session
            .authenticate_password(user.as_str(), code.expose())
            .await
            .map_err(connect_err)?;
        if !auth.success() {
            return Err(TransferError::AuthRejected { user });
        }

        let channel = session
            .channel_open_session()
            .await
            .map_err(connect_err)?;
        channel
            .exec(true, format!("scp -t {}", shell_quote(target)))
            .await
            .map_err(connect_err)?;

        send_file(channel.into_stream(), &header, file).await?;
        info!(instance = %address, source = %source.display(), remote_path = target, bytes = header.size, "Copied file");

        if let Err(e) = session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            debug!(error = %e, "Ignoring error while closing SSH session");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_fingerprint_is_colon_hex() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(
            md5_fingerprint(b""),
            "d4:1d:8c:d9:8f:00:b2:04:e9:80:09:98:ec:f8:42:7e"
        );
    }

    const PROXY_KEY: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIN0DLoxBnbKpEOEc/d0SqNZGecJWxy7JTKds3g//AHol";

    fn proxy_key() -> PublicKey {
        PublicKey::from_openssh(PROXY_KEY).expect("valid ed25519 key")
    }

    #[test]
    fn sha256_fingerprint_is_pinned() {
        let key = proxy_key();
        assert!(fingerprint_matches(
            &key,
            "SHA256:pu8cwqzJKSSQ8N0c7WGY6ny9Ug6X7nuEBc8lM9sY37g"
        ));
        assert!(fingerprint_matches(
            &key,
            " SHA256:pu8cwqzJKSSQ8N0c7WGY6ny9Ug6X7nuEBc8lM9sY37g\n"
        ));
        assert!(!fingerprint_matches(
            &key,
            "SHA256:AAAAwqzJKSSQ8N0c7WGY6ny9Ug6X7nuEBc8lM9sY37g"
        ));
    }

    #[test]
    fn md5_fingerprint_is_pinned_in_either_case() {
        let key = proxy_key();
        assert!(fingerprint_matches(
            &key,
            "c9:84:73:50:3e:79:a0:3d:e3:8c:77:d4:06:8c:51:0e"
        ));
        assert!(fingerprint_matches(
            &key,
            "C9:84:73:50:3E:79:A0:3D:E3:8C:77:D4:06:8C:51:0E"
        ));
        assert!(!fingerprint_matches(
            &key,
            "00:84:73:50:3e:79:a0:3d:e3:8c:77:d4:06:8c:51:0e"
        ));
    }

    #[tokio::test]
    async fn handler_accepts_any_key_without_a_pin() {
        let mut handler = ProxyHandler {
            expected_fingerprint: None,
        };
        let accepted = client::Handler::check_server_key(&mut handler, &proxy_key())
            .await
            .unwrap();
        assert!(accepted);
    }

    #[tokio::test]
    async fn handler_rejects_a_mismatched_key() {
        let mut handler = ProxyHandler {
            expected_fingerprint: Some("SHA256:bm90IHRoaXMga2V5".into()),
        };
        let accepted = client::Handler::check_server_key(&mut handler, &proxy_key())
            .await
            .unwrap();
        assert!(!accepted);
    }

    #[tokio::test]
    async fn unreachable_proxy_is_a_connect_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "x").unwrap();
        // bind then drop to get a port nothing listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let address = InstanceAddress {
            app_guid: "g".into(),
            index: 0,
            host: "127.0.0.1".into(),
            port,
            host_key_fingerprint: None,
        };
        let err = SshTransport::default()
            .copy_file(&address, &path, "/tmp", &AuthCode::new("c"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Connect { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn missing_source_is_an_io_error() {
        let address = InstanceAddress {
            app_guid: "g".into(),
            index: 0,
            host: "127.0.0.1".into(),
            port: 1,
            host_key_fingerprint: None,
        };
        let err = SshTransport::default()
            .copy_file(&address, Path::new("/definitely/not/here"), "/tmp", &AuthCode::new("c"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Io { .. }), "{err:?}");
    }
}
