//! kscli - Kill-Switch CLI Tool
//!
//! Command-line interface for the ksctl kill-switch controller.
//!
//! Exit codes: 0 success, 1 detection failure, 2 apply failure, 3 privilege
//! failure, 4 revert failure. Any non-zero code means the no-leak guarantee
//! may not currently hold; query `kscli status` rather than trusting the
//! pre-call intent.

use clap::{Parser, Subcommand};
use libksctl::*;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the elevated-privilege credential.
/// Supplied by the external secret store; never logged or persisted.
const CREDENTIAL_VAR: &str = "KSCTL_SUDO_PASSWORD";

#[derive(Parser)]
#[command(name = "kscli", version, about = "VPN Kill-Switch Control CLI")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/ksctl/ksctl.toml")]
    config: PathBuf,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover interfaces, synthesize the policy and load it
    Enable {
        /// Restrict tunnel selection to this interface name
        #[arg(long)]
        tunnel_hint: Option<String>,
    },
    /// Revert to the pre-activation filter configuration
    Disable,
    /// Revert a policy left loaded by a previous crash
    Recover,
    /// Show controller and persisted state
    Status,
    /// Synthesize and print a policy from explicit facts, applying nothing
    Render {
        /// Physical egress interface
        #[arg(long)]
        physical: String,
        /// Tunnel interface
        #[arg(long)]
        tunnel: String,
        /// Tunnel local address
        #[arg(long)]
        local: String,
        /// Tunnel remote endpoint address
        #[arg(long)]
        remote: Option<String>,
        /// DNS server, repeatable
        #[arg(long = "dns")]
        dns: Vec<String>,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("kscli={},libksctl={}", level, level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .with_writer(std::io::stderr)
        .init();
}

fn build_controller(config: &KsctlConfig) -> KillSwitchController {
    let applier = Arc::new(PfApplier::new(
        Box::new(SudoRunner::new()),
        config.paths.state_dir.clone(),
        config.paths.pf_conf_path.clone(),
    ));
    KillSwitchController::new(
        Arc::new(HostInspector::new()),
        applier,
        Arc::new(EnvCredentialProvider::new(CREDENTIAL_VAR)),
        config.killswitch.clone(),
    )
}

async fn handle_render(
    physical: String,
    tunnel: String,
    local: String,
    remote: Option<String>,
    dns: Vec<String>,
    fallback: TunnelEndpointFallback,
) -> KsctlResult<()> {
    let physical = NetworkInterface {
        name: physical,
        role: InterfaceRole::Physical,
        local_addr: None,
        remote_addr: None,
    };
    let tunnel = NetworkInterface {
        name: tunnel,
        role: InterfaceRole::Tunnel,
        local_addr: Some(validation::validate_ipv4_address(&local)?),
        remote_addr: match remote {
            Some(r) => Some(validation::validate_ipv4_address(&r)?),
            None => None,
        },
    };
    let dns: BTreeSet<IpAddr> = dns
        .iter()
        .map(|a| validation::validate_ip_address(a))
        .collect::<KsctlResult<_>>()?;

    let policy = synthesize(&physical, &tunnel, &dns, 0, fallback)?;
    print!("{}", pfconf::render(&policy));
    Ok(())
}

async fn handle_status(controller: &KillSwitchController) -> KsctlResult<()> {
    let status = controller.status().await?;
    println!("monitor: {:?}", status.monitor_state);
    match status.persisted {
        Some(state) => {
            println!("loaded: {}", if state.active { "yes" } else { "no" });
            println!("generation: {}", state.result.generation);
            println!("applied_at: {}", state.result.applied_at.to_rfc3339());
            println!("backup: {}", state.result.backup.original_path.display());
        }
        None => println!("loaded: no"),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = match KsctlConfig::load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            process::exit(2);
        }
    };

    let result = match cli.command {
        Commands::Enable { tunnel_hint } => {
            let controller = build_controller(&config);
            match controller.enable(tunnel_hint.as_deref()).await {
                Ok(result) => {
                    println!("Kill switch enabled (generation {})", result.generation);
                    // Keep the process alive so the monitor can revert on
                    // tunnel loss; Ctrl-C reverts and exits
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => controller.disable().await,
                        Err(e) => Err(KsctlError::Io(e)),
                    }
                }
                Err(e) => Err(e),
            }
        }
        Commands::Disable => build_controller(&config).disable().await,
        Commands::Recover => build_controller(&config).recover().await,
        Commands::Status => handle_status(&build_controller(&config)).await,
        Commands::Render { physical, tunnel, local, remote, dns } => {
            handle_render(
                physical,
                tunnel,
                local,
                remote,
                dns,
                config.killswitch.tunnel_endpoint_fallback,
            )
            .await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}
