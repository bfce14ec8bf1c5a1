//! Command line interface for gatelink.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// gatelink - uplink arbitration for home and SMB gateways
#[derive(Parser, Debug)]
#[command(
    name = "gatelink",
    author,
    version,
    about = "Uplink arbitration and link-lifecycle engine",
    long_about = r#"
gatelink picks the single uplink that carries traffic on a gateway with
several candidates, quarantines flaky uplinks, and keeps bridge membership,
DHCP clients and GRE tunnels in line with the decision.

Store notifications are read as JSON lines, one StoreEvent per line:

  {"table":"uplink","kind":"insert","row":{"if_name":"eth0","if_type":"eth","has_L2":true,"has_L3":true,"ipv4":"active"}}
  {"table":"reachability","if_name":"eth0","kind":"router"}

QUICK START:
  Dry run:  gatelink run --events events.jsonl
  Stream:   producer | gatelink run
  Config:   gatelink config --output gatelink.toml
"#
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "GATELINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    pub log_level: String,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Feed store events through the engine against an in-memory store
    Run(RunArgs),

    /// Show the persisted uplink event log
    Events(EventsArgs),

    /// Show or check configuration
    Config(ConfigArgs),
}

/// Run command arguments
#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON-lines event file, `-` for stdin
    #[arg(short, long, default_value = "-")]
    pub events: PathBuf,

    /// Keep running after the input ends so pending timers fire
    #[arg(long)]
    pub follow: bool,

    /// Print every store write the engine issues
    #[arg(short, long)]
    pub writes: bool,
}

/// Events command arguments
#[derive(Args, Debug)]
pub struct EventsArgs {
    /// Event log file (defaults to the configured path)
    #[arg(short, long)]
    pub path: Option<PathBuf>,
}

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Validate the loaded configuration instead of printing an example
    #[arg(long)]
    pub check: bool,

    /// Output path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
