//! Command-line surface of `cfcp`.
//!
//! Parses arguments, merges them with the settings file, wires the core
//! [`Copier`] to a real `cf` client and transport, and prints the outcome.
//! All copy logic lives in `cfcp-core`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use cfcp_core::contract::{Platform, Transport};
use cfcp_core::copier::{Copier, CopierConfig, CopyReport};
use cfcp_core::platform::CfClient;
use cfcp_core::runner::ProcessRunner;
use cfcp_core::transport::{ScpCommandTransport, SshTransport, TransportKind};
use clap::{Parser, ValueEnum};

use crate::load_config::{load_config, Settings};

/// Copy files from the local filesystem into a Cloud Foundry container.
#[derive(Debug, Parser)]
#[clap(
    name = "cfcp",
    version,
    about = "Copy files from the local filesystem into Cloud Foundry application containers",
    long_about = "Copy files from the local filesystem into Cloud Foundry application containers.\n\n\
Requires the cf CLI on the PATH and an active session ('cf login').\n\
Wildcards are not supported, directories are not copied yet, and the target\n\
directory is not created in the container when it doesn't exist."
)]
pub struct Cli {
    /// Cloud Foundry application name
    #[clap(short = 'a', long = "app")]
    pub app: String,

    /// Skip the source when its path contains this text. Can be repeated
    #[clap(short = 'x', long = "exclude", value_name = "PATTERN")]
    pub excludes: Vec<String>,

    /// Print what would be copied without copying anything
    #[clap(short = 's', long)]
    pub simulated: bool,

    /// YAML settings file
    #[clap(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Per-instance transfer timeout in seconds
    #[clap(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// How to reach the instances
    #[clap(long, value_enum)]
    pub transport: Option<TransportArg>,

    /// Echo cf and scp invocations and their output
    #[clap(long)]
    pub print_commands: bool,

    /// Debug logging
    #[clap(short, long)]
    pub verbose: bool,

    /// [SRC] TRG: source path (default: current directory) and target path in the container
    #[clap(value_name = "PATH", num_args = 1..=2, required = true)]
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportArg {
    Ssh,
    Scp,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Ssh => TransportKind::Ssh,
            TransportArg::Scp => TransportKind::Scp,
        }
    }
}

impl Cli {
    /// SRC, defaulting to the current directory when only TRG is given.
    pub fn source(&self) -> &Path {
        match self.paths.as_slice() {
            [source, _] => Path::new(source),
            _ => Path::new("."),
        }
    }

    pub fn target(&self) -> &str {
        self.paths.last().map(String::as_str).unwrap_or_default()
    }

    /// Command-line flags win over the settings file.
    pub fn apply_to(&self, settings: &mut Settings) {
        if let Some(secs) = self.timeout {
            settings.transfer_timeout_secs = secs;
        }
        if let Some(transport) = self.transport {
            settings.transport = transport.into();
        }
        if self.print_commands {
            settings.print_commands = true;
        }
    }
}

/// Async entrypoint shared by `main()` and integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    let mut settings = load_config(cli.config.as_deref())?;
    cli.apply_to(&mut settings);
    if settings.transfer_timeout_secs == 0 {
        anyhow::bail!("--timeout must be greater than zero");
    }
    tracing::debug!(?settings, "Effective settings");

    let config = CopierConfig {
        app_name: cli.app.clone(),
        simulated: cli.simulated,
        transfer_timeout: settings.transfer_timeout(),
        verify_host_key: settings.verify_host_key,
    };
    let platform = CfClient::new(ProcessRunner::new(), settings.cf_binary.clone())
        .with_print_commands(settings.print_commands);

    match settings.transport {
        TransportKind::Ssh => {
            // keep the SSH session alive at least as long as a transfer may take
            let transport = SshTransport::new(settings.transfer_timeout().max(Duration::from_secs(30)));
            execute(&cli, config, platform, transport).await
        }
        TransportKind::Scp => {
            let transport = ScpCommandTransport::new(ProcessRunner::new())
                .with_print_commands(settings.print_commands);
            execute(&cli, config, platform, transport).await
        }
    }
}

async fn execute<P, T>(cli: &Cli, config: CopierConfig, platform: P, transport: T) -> Result<()>
where
    P: Platform,
    T: Transport,
{
    let copier = Copier::new(config, platform, transport)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create copier: {e}"))?;

    let report = copier
        .copy(cli.source(), cli.target(), &cli.excludes)
        .await
        .map_err(|e| anyhow::anyhow!("Copy failed: {e}"))?;

    match report {
        CopyReport::Excluded { source, pattern } => {
            println!("skipped {} (excluded by '{pattern}')", source.display());
        }
        CopyReport::Simulated { planned } => {
            for plan in planned {
                println!("{plan}");
            }
        }
        CopyReport::Copied {
            source,
            target,
            instances,
        } => {
            for index in instances {
                println!("copied {} -> {}:{target} (instance {index})", source.display(), cli.app);
            }
        }
    }
    Ok(())
}
