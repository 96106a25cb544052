//! # platform: typed access to Cloud Foundry through the `cf` CLI
//!
//! [`CfClient`] shells out to `cf` via a [`CommandRunner`] and turns its
//! semi-structured output into [`SessionTarget`], [`PlatformInfo`], app guids,
//! instance counts and one-time SSH codes.
//!
//! The argument vectors passed to `cf` are a compatibility contract with the
//! CLI and must stay exactly as they are.

use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use tracing::{debug, info, warn};

use crate::contract::{AuthCode, Platform};
use crate::error::{ExecError, PlatformError};
use crate::runner::CommandRunner;

/// Port the SSH proxy listens on when the endpoint doesn't say.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Output of `cf target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub api_endpoint: String,
    pub api_version: String,
    pub user: String,
    pub org: String,
    pub space: String,
}

impl fmt::Display for SessionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{api_endpoint: {}, api_version: {}, user: {}, org: {}, space: {}}}",
            self.api_endpoint, self.api_version, self.user, self.org, self.space
        )
    }
}

/// The `/v2/info` metadata document.
///
/// Unknown fields are ignored; missing or `null` fields decode to their zero value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PlatformInfo {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub build: String,
    #[serde(deserialize_with = "null_as_default")]
    pub support: String,
    #[serde(deserialize_with = "null_as_default")]
    pub version: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(deserialize_with = "null_as_default")]
    pub authorization_endpoint: String,
    #[serde(deserialize_with = "null_as_default")]
    pub token_endpoint: String,
    #[serde(deserialize_with = "null_as_default")]
    pub min_cli_version: String,
    #[serde(deserialize_with = "null_as_default")]
    pub min_recommended_cli_version: String,
    #[serde(deserialize_with = "null_as_default")]
    pub app_ssh_endpoint: String,
    #[serde(deserialize_with = "null_as_default")]
    pub app_ssh_host_key_fingerprint: String,
    #[serde(deserialize_with = "null_as_default")]
    pub app_ssh_oauth_client: String,
    #[serde(deserialize_with = "null_as_default")]
    pub doppler_logging_endpoint: String,
    #[serde(deserialize_with = "null_as_default")]
    pub api_version: String,
    #[serde(deserialize_with = "null_as_default")]
    pub osbapi_version: String,
}

impl PlatformInfo {
    /// Host and port of the application SSH proxy.
    pub fn ssh_endpoint(&self) -> Result<SshEndpoint, PlatformError> {
        SshEndpoint::parse(&self.app_ssh_endpoint)
    }

    /// The advertised SSH host key fingerprint, if any.
    pub fn host_key_fingerprint(&self) -> Option<&str> {
        let fp = self.app_ssh_host_key_fingerprint.trim();
        (!fp.is_empty()).then_some(fp)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// `host:port` of the SSH proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshEndpoint {
    pub host: String,
    pub port: u16,
}

impl SshEndpoint {
    /// Split on the last colon; no colon means the default port.
    pub fn parse(endpoint: &str) -> Result<Self, PlatformError> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(PlatformError::decode(
                "ssh endpoint",
                "app_ssh_endpoint is empty; SSH may be disabled on this platform",
            ));
        }
        let (host, port) = match endpoint.rsplit_once(':') {
            // bare IPv6 literal without brackets or port
            Some((host, _)) if host.contains(':') && !host.starts_with('[') => {
                (endpoint, DEFAULT_SSH_PORT)
            }
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|e| {
                    PlatformError::decode("ssh endpoint", format!("bad port in '{endpoint}': {e}"))
                })?;
                (host, port)
            }
            None => (endpoint, DEFAULT_SSH_PORT),
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(PlatformError::decode(
                "ssh endpoint",
                format!("no host in '{endpoint}'"),
            ));
        }
        Ok(Self {
            host: host.to_owned(),
            port,
        })
    }
}

impl fmt::Display for SshEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

static TARGET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^api endpoint:[ \t]*(.*?)[ \t]*\r?\napi version:[ \t]*(.*?)[ \t]*\r?\nuser:[ \t]*(.*?)[ \t]*\r?\norg:[ \t]*(.*?)[ \t]*\r?\nspace:[ \t]*(.*?)[ \t]*\r?$",
    )
    .expect("static regex is valid")
});

/// Parse the five labelled lines printed by `cf target`.
pub fn parse_session_target(output: &str) -> Result<SessionTarget, PlatformError> {
    let caps = TARGET_RE
        .captures(output)
        .ok_or_else(|| PlatformError::ParseTarget {
            output: output.trim().to_owned(),
        })?;
    let field = |i: usize| caps.get(i).map(|m| m.as_str().to_owned()).unwrap_or_default();
    Ok(SessionTarget {
        api_endpoint: field(1),
        api_version: field(2),
        user: field(3),
        org: field(4),
        space: field(5),
    })
}

/// Decode the `/v2/info` JSON document.
pub fn parse_platform_info(output: &str) -> Result<PlatformInfo, PlatformError> {
    serde_json::from_str(output.trim()).map_err(|e| PlatformError::decode("platform info", e))
}

#[derive(Deserialize)]
struct AppResource {
    entity: AppEntity,
}

#[derive(Deserialize)]
struct AppEntity {
    instances: u32,
}

/// Read `entity.instances` from a `/v2/apps/<guid>` document.
pub fn parse_instance_count(output: &str) -> Result<u32, PlatformError> {
    serde_json::from_str::<AppResource>(output.trim())
        .map(|app| app.entity.instances)
        .map_err(|e| PlatformError::decode("app resource", e))
}

/// Count instance rows (lines starting with `#`) in `cf app <name>` output.
pub fn count_instance_lines(summary: &str) -> u32 {
    summary
        .lines()
        .filter(|line| line.starts_with('#'))
        .count() as u32
}

/// Cloud Foundry client backed by the `cf` executable.
pub struct CfClient<R> {
    runner: R,
    binary: String,
    print_commands: bool,
}

impl<R: CommandRunner> CfClient<R> {
    pub fn new(runner: R, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
            print_commands: false,
        }
    }

    /// Echo non-secret `cf` invocations and their output to the console.
    pub fn with_print_commands(mut self, print: bool) -> Self {
        self.print_commands = print;
        self
    }

    async fn cf(&self, args: &[&str], print: bool) -> Result<String, ExecError> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.runner.exec(&self.binary, &args, print).await
    }
}

#[async_trait]
impl<R: CommandRunner> Platform for CfClient<R> {
    async fn session_target(&self) -> Result<SessionTarget, PlatformError> {
        let output = match self.cf(&["target"], self.print_commands).await {
            Ok(out) => out,
            Err(ExecError::NonZeroExit { output, .. }) if output.contains("Not logged") => {
                return Err(PlatformError::NotAuthenticated)
            }
            Err(e) => return Err(e.into()),
        };
        if output.contains("Not logged") {
            return Err(PlatformError::NotAuthenticated);
        }
        let target = parse_session_target(&output)?;
        debug!(%target, "Parsed cf target");
        Ok(target)
    }

    async fn platform_info(&self) -> Result<PlatformInfo, PlatformError> {
        let output = self.cf(&["curl", "/v2/info"], self.print_commands).await?;
        parse_platform_info(&output)
    }

    async fn app_guid(&self, app_name: &str) -> Result<String, PlatformError> {
        let output = self
            .cf(&["app", app_name, "--guid"], self.print_commands)
            .await
            .map_err(|source| PlatformError::AppLookup {
                app: app_name.to_owned(),
                source,
            })?;
        let guid = output.trim();
        if guid.is_empty() {
            return Err(PlatformError::AppNotFound {
                app: app_name.to_owned(),
            });
        }
        Ok(guid.to_owned())
    }

    async fn instance_count(
        &self,
        app_name: &str,
        app_guid: &str,
    ) -> Result<u32, PlatformError> {
        let path = format!("/v2/apps/{app_guid}");
        let structured = match self.cf(&["curl", &path], self.print_commands).await {
            Ok(out) => parse_instance_count(&out),
            Err(e) => Err(e.into()),
        };
        let count = match structured {
            Ok(count) => count,
            Err(e) => {
                warn!(app = app_name, error = %e, "Structured instance query failed, counting app summary rows");
                let summary = self
                    .cf(&["app", app_name], self.print_commands)
                    .await
                    .map_err(|source| PlatformError::AppLookup {
                        app: app_name.to_owned(),
                        source,
                    })?;
                count_instance_lines(&summary)
            }
        };
        if count == 0 {
            return Err(PlatformError::NoInstances {
                app: app_name.to_owned(),
            });
        }
        info!(app = app_name, instances = count, "Resolved instance count");
        Ok(count)
    }

    async fn generate_auth_code(&self) -> Result<AuthCode, PlatformError> {
        // never echoed: the output is the secret
        let output = self.cf(&["ssh-code"], false).await?;
        Ok(AuthCode::new(output))
    }
}
