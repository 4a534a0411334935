use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub mod platform;
pub mod scenario;

use platform::SimulatedPlatform;
use route_arbiter::logging::{self, LoggingMode};
use route_arbiter::{ArbiterConfig, ChannelEventSource, RouteEvent, RouteManager, RouteSnapshot};
use scenario::Scenario;

/// Audio route arbiter simulator
///
/// Replays a scenario of device, call and user events against the route
/// arbiter with a simulated platform, printing every route notification.
#[derive(Parser, Debug)]
#[command(name = "route-sim")]
#[command(about = "Replay audio routing scenarios against the route arbiter")]
#[command(version)]
pub struct Args {
    /// Scenario JSON file; runs the built-in demo when omitted
    pub scenario: Option<PathBuf>,

    /// Delay before the simulated headset confirms an SCO connect
    #[arg(long, default_value = "300")]
    pub sco_latency_ms: u64,

    /// Simulate a headset that never confirms SCO
    #[arg(long)]
    pub never_connect: bool,

    /// Simulate a device without an earpiece (tablet)
    #[arg(long)]
    pub no_earpiece: bool,

    /// Bluetooth connect timeout in milliseconds
    #[arg(long, default_value = "5000")]
    pub bt_timeout_ms: u64,

    /// Bluetooth connect attempts before giving up on a headset
    #[arg(long, default_value = "3")]
    pub bt_attempts: u32,

    /// Print notifications and the final snapshot as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

impl Args {
    /// SCO latency, or `None` when SCO should never connect
    pub fn sco_latency(&self) -> Option<Duration> {
        (!self.never_connect).then(|| Duration::from_millis(self.sco_latency_ms))
    }

    /// Arbiter configuration derived from the flags
    pub fn arbiter_config(&self) -> ArbiterConfig {
        let base = if self.no_earpiece {
            ArbiterConfig::tablet()
        } else {
            ArbiterConfig::default()
        };

        ArbiterConfig {
            bluetooth_connect_timeout: Duration::from_millis(self.bt_timeout_ms),
            max_bluetooth_attempts: self.bt_attempts,
            ..base
        }
    }

    /// JSON logs alongside JSON output, compact ones otherwise
    pub fn logging_mode(&self) -> LoggingMode {
        if self.json {
            LoggingMode::Json
        } else {
            LoggingMode::Development
        }
    }

    /// Validate command line arguments
    pub fn validate(&self) -> Result<()> {
        match self.log_level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(anyhow::anyhow!(
                    "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
                    self.log_level
                ));
            }
        }

        self.arbiter_config()
            .validate()
            .context("Invalid arbiter settings")?;

        Ok(())
    }
}

/// Install the arbiter's logging. `ROUTE_LOG_MODE` takes precedence over
/// the flags.
fn init_tracing(args: &Args) -> Result<()> {
    if std::env::var_os(logging::LOG_MODE_ENV).is_some() {
        return logging::init_logging_from_env().context("Failed to initialize logging");
    }

    logging::init_logging_with_level(args.logging_mode(), &args.log_level)
        .context("Failed to initialize logging")
}

fn print_event(event: &RouteEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::error!("Failed to serialize event: {}", e),
        }
        return;
    }

    match event {
        RouteEvent::RouteChanged { route, previous } => {
            println!("route     {previous} -> {route}")
        }
        RouteEvent::BluetoothLinkChanged { state } => println!("sco       {state}"),
        RouteEvent::FallbackTriggered { device, reason } => {
            println!("fallback  {device}: {reason}")
        }
    }
}

fn print_snapshot(snapshot: &RouteSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
    } else {
        println!("\nFinal state:\n{}", serde_json::to_string_pretty(snapshot)?);
    }
    Ok(())
}

/// Run a scenario end to end and return the final snapshot
async fn simulate(args: &Args, scenario: &Scenario) -> Result<RouteSnapshot> {
    let (link_tx, link_source) = ChannelEventSource::new("simulated-sco", 16);
    let platform = Arc::new(SimulatedPlatform::new(link_tx, args.sco_latency()));

    let manager = RouteManager::builder()
        .with_config(args.arbiter_config())
        .with_platform(platform)
        .with_event_source(link_source)
        .build()
        .context("Failed to start route manager")?;

    let mut events = manager.subscribe();
    let json = args.json;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event, json);
        }
    });

    scenario
        .run(&manager)
        .await
        .with_context(|| format!("Scenario '{}' failed", scenario.name))?;

    let snapshot = manager.snapshot().await?;
    manager.shutdown().await?;
    printer.await.context("Event printer panicked")?;

    Ok(snapshot)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.validate()?;
    init_tracing(&args)?;

    let scenario = match &args.scenario {
        Some(path) => Scenario::load(path)?,
        None => Scenario::demo(),
    };
    info!("Loaded scenario '{}'", scenario.name);

    let snapshot = simulate(&args, &scenario).await?;
    print_snapshot(&snapshot, args.json)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use route_arbiter::{DeviceKind, LinkState, PlatformCommand, Route};

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["route-sim"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_flags_map_to_config() {
        let args = args(&["--no-earpiece", "--bt-timeout-ms", "2000", "--bt-attempts", "1"]);
        let config = args.arbiter_config();
        assert!(!config.has_earpiece);
        assert_eq!(config.bluetooth_connect_timeout, Duration::from_secs(2));
        assert_eq!(config.max_bluetooth_attempts, 1);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_invalid_flags() {
        assert!(args(&["--log-level", "loud"]).validate().is_err());
        assert!(args(&["--bt-attempts", "0"]).validate().is_err());
        assert_eq!(args(&["--never-connect"]).sco_latency(), None);
    }

    #[test]
    fn test_logging_mode_follows_output_format() {
        assert_eq!(args(&[]).logging_mode(), LoggingMode::Development);
        assert_eq!(args(&["--json"]).logging_mode(), LoggingMode::Json);
    }

    #[tokio::test(start_paused = true)]
    async fn test_demo_ends_idle() {
        let snapshot = simulate(&args(&[]), &Scenario::demo()).await.unwrap();

        assert_eq!(snapshot.active, Route::Invalid);
        assert!(!snapshot.call_active);
        assert_eq!(snapshot.link, LinkState::Disconnected);
        assert_eq!(
            snapshot.present,
            vec![DeviceKind::Earpiece, DeviceKind::Speaker, DeviceKind::WiredHeadset]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_headset_that_never_connects() {
        let (link_tx, link_source) = ChannelEventSource::new("simulated-sco", 16);
        let platform = Arc::new(SimulatedPlatform::new(link_tx, None));
        let log = platform.command_log();

        let manager = RouteManager::builder()
            .with_config(args(&["--bt-attempts", "1"]).arbiter_config())
            .with_platform(platform)
            .with_event_source(link_source)
            .build()
            .unwrap();

        let scenario = Scenario::from_json(
            "never",
            r#"[
                {"step": "plug", "device": "bluetooth:sco"},
                {"step": "call_start"},
                {"step": "wait_ms", "ms": 6000}
            ]"#,
        )
        .unwrap();
        scenario.run(&manager).await.unwrap();

        assert_eq!(manager.current_route().await.unwrap(), Route::Earpiece);
        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec![
                PlatformCommand::StartBluetoothSco,
                PlatformCommand::EnableRoute(DeviceKind::Earpiece),
                PlatformCommand::StopBluetoothSco,
            ]
        );

        manager.shutdown().await.unwrap();
    }
}
