//! gatelink CLI - uplink arbitration dry runs and tooling.

use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::signal;

use gatelink::cli::{Cli, Commands, ConfigArgs, EventsArgs, OutputFormat, RunArgs};
use gatelink::clock::SystemClock;
use gatelink::config::{init_logging, Config, LoggingConfig};
use gatelink::engine::{Engine, EngineEvent, EngineHandle, EngineSnapshot};
use gatelink::error::{Error, Result};
use gatelink::events::UplinkEventLog;
use gatelink::store::{Collaborators, MemoryStore, StoreEvent};
use gatelink::VERSION;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config if specified
    let config = if let Some(ref path) = cli.config {
        Config::load(path)?
    } else if Config::default_path().exists() {
        Config::load(Config::default_path())?
    } else {
        Config::default()
    };

    // Initialize logging
    let log_config = LoggingConfig {
        level: cli.log_level.clone(),
        color: !cli.no_color && config.logging.color,
        format: config.logging.format.clone(),
    };
    init_logging(&log_config)?;

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Dispatch command
    match cli.command {
        Commands::Run(args) => run_engine(args, config, cli.format).await,
        Commands::Events(args) => run_events(args, &config, cli.format),
        Commands::Config(args) => run_config(args, &config),
    }
}

/// Replay or stream store events through the engine.
async fn run_engine(args: RunArgs, config: Config, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Text {
        println!(
            "{} {} {}",
            "gatelink".bright_cyan().bold(),
            VERSION.dimmed(),
            "(dry run, in-memory store)".dimmed()
        );
    }

    let store = Arc::new(MemoryStore::new());
    let event_log = match UplinkEventLog::load(config.events.clone()) {
        Ok(log) => log,
        Err(e) => {
            tracing::warn!(error = %e, "Starting with an empty uplink event log");
            UplinkEventLog::new(config.events.clone())
        }
    };
    let engine = Engine::new(
        config.engine.clone(),
        Collaborators::memory(&store),
        Arc::new(SystemClock::new()),
    )
    .with_event_log(event_log);

    let handle = EngineHandle::spawn(engine);
    let printer = (format == OutputFormat::Text).then(|| {
        let mut events = handle.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                print_event(&event);
            }
        })
    });

    let input: Box<dyn AsyncRead + Unpin + Send> = if args.events.as_os_str() == "-" {
        Box::new(tokio::io::stdin())
    } else {
        Box::new(tokio::fs::File::open(&args.events).await?)
    };
    let mut lines = BufReader::new(input).lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        match StoreEvent::from_json_line(&line) {
            Ok(event) => handle.send(event).await?,
            Err(e) => tracing::warn!(line = line_no, error = %e, "Skipping malformed event"),
        }
    }

    if args.follow {
        tracing::info!("Input finished, waiting for timers (Ctrl+C to stop)");
        signal::ctrl_c().await?;
    }

    let snapshot = handle.snapshot().await?;
    let engine = handle.shutdown().await?;
    if let Some(printer) = printer {
        printer.abort();
    }

    match format {
        OutputFormat::Json => {
            let writes = if args.writes { store.writes() } else { Vec::new() };
            let out = serde_json::json!({ "snapshot": snapshot, "writes": writes });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            print_snapshot(&snapshot);
            if args.writes {
                println!();
                println!("{}", "Store writes:".bright_white().bold());
                for write in store.writes() {
                    println!("  {} {}", "→".cyan(), serde_json::to_string(&write)?);
                }
            }
            println!();
            println!(
                "{} {} events processed, {} uplink events logged",
                "✓".green(),
                line_no,
                engine.event_log().len()
            );
        }
    }

    Ok(())
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::WinnerChanged { previous, current } => println!(
            "{} uplink {} → {}",
            "●".bright_green(),
            previous.as_ref().map_or("none", |id| id.as_str()),
            current.as_ref().map_or("none", |id| id.as_str()).bold()
        ),
        EngineEvent::RoleChanged { from, to } => {
            println!("{} role {} → {}", "●".bright_blue(), from, to.to_string().bold());
        }
        EngineEvent::UplinkBlocked { uplink, until } => {
            println!("{} {} blocked until {}", "●".yellow(), uplink, until.to_rfc3339());
        }
        EngineEvent::UplinkUnblocking(uplink) => {
            println!("{} {} unblocking", "●".cyan(), uplink);
        }
        EngineEvent::ManagersRestarted => {
            println!("{} managers restarted", "●".red());
        }
    }
}

fn print_snapshot(snapshot: &EngineSnapshot) {
    let state = &snapshot.state;
    println!();
    println!("{}", "Link state:".bright_white().bold());
    println!(
        "  Current uplink: {}",
        state
            .current_uplink
            .as_ref()
            .map_or_else(|| "none".red().to_string(), |id| id.to_string().green().to_string())
    );
    println!("  Device role:    {}", state.device_role);
    println!("  Cloud:          {}", if state.cloud_connected { "connected" } else { "disconnected" });
    if let Some(tag) = state.vtag.tag {
        println!("  VLAN tag:       {tag} ({:?})", state.vtag.status);
    }
    if let Some(at) = snapshot.next_wakeup {
        println!("  Next wakeup:    {}", at.to_rfc3339());
    }

    if snapshot.uplinks.is_empty() {
        return;
    }
    println!();
    println!(
        "  {:<12} {:<7} {:>4} {:<3} {:<11} {:<11} {}",
        "UPLINK", "TYPE", "PRIO", "L3", "IPV4", "IPV6", "COUNTERS r/c/i"
    );
    for uplink in &snapshot.uplinks {
        let marker = if uplink.is_used { "*" } else { " " };
        println!(
            "{} {:<12} {:<7} {:>4} {:<3} {:<11} {:<11} {}/{}/{}",
            marker.green(),
            uplink.id,
            uplink.if_type.to_string(),
            uplink.priority,
            if uplink.has_l3 { "yes" } else { "no" },
            uplink.ipv4.as_str(),
            uplink.ipv6.as_str(),
            uplink.counters.router,
            uplink.counters.cloud,
            uplink.counters.internet
        );
    }
    if !snapshot.limp_ports.is_empty() {
        println!("  Limp ports: {}", snapshot.limp_ports.join(", "));
    }
}

/// Show the persisted uplink event log.
fn run_events(args: EventsArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let mut events_config = config.events.clone();
    if args.path.is_some() {
        events_config.path = args.path;
    }
    if events_config.path.is_none() {
        events_config.path = Some(Config::default_events_path());
    }

    let log = UplinkEventLog::load(events_config)?;
    match format {
        OutputFormat::Json => {
            let events: Vec<_> = log.events().collect();
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
        OutputFormat::Text => {
            if log.is_empty() {
                println!("{} No uplink events recorded", "○".dimmed());
                return Ok(());
            }
            for event in log.events() {
                let when = chrono::DateTime::from_timestamp(event.timestamp, 0)
                    .map_or_else(|| event.timestamp.to_string(), |t| t.to_rfc3339());
                let state = if event.connected {
                    "connected".green()
                } else {
                    "disconnected".red()
                };
                println!("  {when}  {:<9} {state}", event.kind.to_string());
            }
            if let Some(kind) = log.active_outage() {
                println!();
                println!("{} Outage in progress: {kind}", "⚠".yellow());
            }
        }
    }
    Ok(())
}

/// Print an example configuration or check the loaded one.
fn run_config(args: ConfigArgs, config: &Config) -> Result<()> {
    if args.check {
        config.validate()?;
        println!("{} Configuration is valid", "✓".green());
        return Ok(());
    }

    let output = toml::to_string_pretty(&Config::example())
        .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &output)?;
        println!(
            "{} Configuration written to {}",
            "✓".green(),
            path.display()
        );
    } else {
        println!("{output}");
    }

    Ok(())
}
