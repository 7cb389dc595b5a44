//! airctrl - command-line tool for Philips air purifiers and humidifiers
//!
//! Talks to devices over encrypted CoAP. Every command connects, does its
//! work and disconnects, except `watch`, which keeps polling until Ctrl+C.

mod commands;
mod config;
mod output;

use std::path::PathBuf;
use std::sync::Arc;

use airctrl_client::DeviceClient;
use airctrl_coap::{create_connector, SimulatedConfig, TransportConfig, UdpConfig};
use airctrl_conv::CapabilityRegistry;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::{ArgOverrides, Config, MergedConfig};
use output::{OutputContext, OutputFormat};

/// Control Philips air purifiers and humidifiers
#[derive(Parser)]
#[command(name = "airctrl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// CoAP port of the device
    #[arg(short, long, global = true, env = "AIRCTRL_PORT")]
    port: Option<u16>,

    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Extra YAML profile file (repeatable)
    #[arg(long = "profiles", global = true)]
    profiles: Vec<PathBuf>,

    /// Talk to an in-process simulated device of this model instead of the network
    #[arg(long, global = true, value_name = "MODEL")]
    simulate: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum)]
    output: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll a device once and print its decoded status
    Status {
        /// Device host (defaults to `host` from the config file)
        host: Option<String>,

        /// Print the raw key/value status instead
        #[arg(long)]
        raw: bool,
    },

    /// Set a capability, e.g. `set 10.0.0.7 fan_speed turbo`
    Set {
        /// Device host
        host: String,

        /// Capability name (fan_speed, target_humidity, child_lock, ...)
        capability: String,

        /// Value (on/off, a number or a label)
        value: String,
    },

    /// Follow a device's status until Ctrl+C
    Watch {
        /// Device host (defaults to `host` from the config file)
        host: Option<String>,
    },

    /// Reset a filter's life counter
    ResetFilter {
        /// Device host
        host: String,

        /// Filter: pre, hepa, carbon or wick
        filter: String,
    },

    /// List known model profiles, or show the capabilities of one model
    Profiles {
        /// Model id to resolve (e.g. AC2729/10)
        model: Option<String>,
    },
}

impl From<OutputFormat> for &str {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        }
    }
}

impl Commands {
    fn host(&self) -> Option<&str> {
        match self {
            Commands::Status { host, .. } | Commands::Watch { host } => host.as_deref(),
            Commands::Set { host, .. } | Commands::ResetFilter { host, .. } => Some(host),
            Commands::Profiles { .. } => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise info, or debug with -v. Logs go to stderr so
    // json output stays parseable.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("airctrl=debug,airctrl_client=debug,airctrl_coap=debug")
        } else {
            EnvFilter::new("airctrl=info,airctrl_client=info")
        }
    });

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().unwrap_or_default(),
    };

    let merged = config.merge_with_args(ArgOverrides {
        host: cli.command.host(),
        port: cli.port,
        output: cli.output.map(|f| f.into()),
        no_color: cli.no_color,
        profiles: &cli.profiles,
    });

    let format = OutputFormat::from_name(&merged.output);
    let ctx = OutputContext::new(format, merged.no_color, cli.quiet);

    let result = run(&cli, &merged, &ctx).await;
    if let Err(e) = &result {
        ctx.error(&format!("Error: {:#}", e));
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: &Cli, merged: &MergedConfig, ctx: &OutputContext) -> Result<()> {
    let registry = Arc::new(load_registry(merged)?);

    if let Commands::Profiles { model } = &cli.command {
        return commands::profiles(&registry, model.as_deref(), ctx);
    }

    let host = merged.require_host()?;
    let mut client_config = merged.client.clone();
    // One-shot commands never need the background poller
    client_config.auto_poll = matches!(cli.command, Commands::Watch { .. });

    let transport = match &cli.simulate {
        Some(model) => TransportConfig::Simulated(SimulatedConfig {
            model_id: model.clone(),
            latency_ms: 0,
        }),
        None => TransportConfig::Udp(UdpConfig {
            port: merged.port.unwrap_or_else(|| UdpConfig::default().port),
        }),
    };
    let client = DeviceClient::new(registry, create_connector(&transport), client_config);

    match &cli.command {
        Commands::Status { raw, .. } => {
            commands::status(&client, host, merged.port, *raw, ctx).await
        }
        Commands::Set {
            capability, value, ..
        } => commands::set(&client, host, merged.port, capability, value, ctx).await,
        Commands::Watch { .. } => commands::watch(&client, host, merged.port, ctx).await,
        Commands::ResetFilter { filter, .. } => {
            commands::reset_filter(&client, host, merged.port, filter, ctx).await
        }
        Commands::Profiles { .. } => Ok(()),
    }
}

/// Built-in profiles plus any YAML files from the config and command line
fn load_registry(merged: &MergedConfig) -> Result<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();
    for path in &merged.profiles {
        let count = registry
            .load_file(path)
            .with_context(|| format!("Failed to load profiles from {}", path.display()))?;
        tracing::debug!(path = %path.display(), count, "Loaded profiles");
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_set_command() {
        let cli = Cli::parse_from([
            "airctrl", "-o", "json", "set", "10.0.0.7", "fan_speed", "turbo",
        ]);
        assert_eq!(cli.output, Some(OutputFormat::Json));
        assert_eq!(cli.command.host(), Some("10.0.0.7"));
        match cli.command {
            Commands::Set {
                capability, value, ..
            } => {
                assert_eq!(capability, "fan_speed");
                assert_eq!(value, "turbo");
            }
            _ => panic!("expected set"),
        }
    }

    #[test]
    fn test_host_is_optional_for_status() {
        let cli = Cli::parse_from(["airctrl", "status", "--raw"]);
        assert_eq!(cli.command.host(), None);
    }

    #[test]
    fn test_load_registry_with_extra_profiles() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
profiles:
  - model_id: "AC9999/10"
    capabilities:
      - capability: power
        rule: switch
        key: pwr
        "on": "1"
        "off": "0"
        writable: true
"#
        )
        .unwrap();

        let merged = Config {
            profiles: vec![file.path().to_path_buf()],
            ..Default::default()
        }
        .merge_with_args(ArgOverrides::default());

        let registry = load_registry(&merged).unwrap();
        assert!(registry.get("AC9999/10").is_some());
    }
}
