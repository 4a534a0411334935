//! Scenario files and the step runner
//!
//! A scenario is a JSON list of steps:
//!
//! ```json
//! [
//!   { "step": "plug", "device": "wired_headset" },
//!   { "step": "call_start", "mode": "voice" },
//!   { "step": "plug", "device": "bluetooth:sco" },
//!   { "step": "wait_ms", "ms": 500 },
//!   { "step": "request", "device": "speaker" },
//!   { "step": "call_stop" }
//! ]
//! ```

use std::path::Path;
use std::time::Duration;

use route_arbiter::{CallMode, Device, DeviceKind, Route, RouteError, RouteManager};
use serde::Deserialize;
use tracing::{info, warn};

/// Errors loading or running a scenario
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("Failed to read scenario {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid scenario JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Step {index} ({step}): {source}")]
    Step {
        index: usize,
        step: &'static str,
        #[source]
        source: RouteError,
    },

    #[error("Scenario has no steps")]
    Empty,
}

/// One scenario step
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Device becomes present; `device` is a kind or `bluetooth:<profile>`
    Plug { device: String },
    /// Device goes away
    Unplug { device: String },
    CallStart {
        #[serde(default)]
        mode: CallMode,
    },
    CallStop,
    /// User picks a route
    Request { device: DeviceKind },
    ClearOverride,
    WaitMs { ms: u64 },
    /// The OS says it is using `route`
    ReportRoute { route: Route },
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Plug { .. } => "plug",
            Step::Unplug { .. } => "unplug",
            Step::CallStart { .. } => "call_start",
            Step::CallStop => "call_stop",
            Step::Request { .. } => "request",
            Step::ClearOverride => "clear_override",
            Step::WaitMs { .. } => "wait_ms",
            Step::ReportRoute { .. } => "report_route",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub name: String,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_json(name: impl Into<String>, json: &str) -> Result<Self, ScenarioError> {
        let steps: Vec<Step> = serde_json::from_str(json)?;
        if steps.is_empty() {
            return Err(ScenarioError::Empty);
        }
        Ok(Self {
            name: name.into(),
            steps,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let json = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scenario".to_string());
        Self::from_json(name, &json)
    }

    /// Commute: headset in, call, earbuds connect, user flips to speaker
    /// and back, earbuds die, call ends.
    pub fn demo() -> Self {
        let plug = |device: &str| Step::Plug {
            device: device.to_string(),
        };
        let unplug = |device: &str| Step::Unplug {
            device: device.to_string(),
        };

        Self {
            name: "demo".to_string(),
            steps: vec![
                plug("wired_headset"),
                Step::CallStart {
                    mode: CallMode::Voice,
                },
                plug("bluetooth:sco"),
                Step::WaitMs { ms: 1000 },
                Step::Request {
                    device: DeviceKind::Speaker,
                },
                Step::WaitMs { ms: 200 },
                Step::ClearOverride,
                Step::WaitMs { ms: 1000 },
                unplug("bluetooth:sco"),
                Step::WaitMs { ms: 200 },
                Step::CallStop,
            ],
        }
    }

    /// Apply every step to `manager` in order.
    ///
    /// A rejected route request is reported and the run carries on; the
    /// arbiter keeps its previous route in that case.
    pub async fn run(&self, manager: &RouteManager) -> Result<(), ScenarioError> {
        info!("Running scenario '{}' ({} steps)", self.name, self.steps.len());

        for (index, step) in self.steps.iter().enumerate() {
            info!("Step {}: {:?}", index + 1, step);
            let fail = |source: RouteError| ScenarioError::Step {
                index: index + 1,
                step: step.name(),
                source,
            };

            match step {
                Step::Plug { device } => {
                    let device: Device = device.parse().map_err(fail)?;
                    manager.device_presence_changed(device, true).await.map_err(fail)?;
                }
                Step::Unplug { device } => {
                    let device: Device = device.parse().map_err(fail)?;
                    manager.device_presence_changed(device, false).await.map_err(fail)?;
                }
                Step::CallStart { mode } => manager.call_started(*mode).await.map_err(fail)?,
                Step::CallStop => manager.call_stopped().await.map_err(fail)?,
                Step::Request { device } => match manager.request_route(*device).await {
                    Ok(route) => info!("Request for {} granted, routed to {}", device, route),
                    Err(e @ RouteError::DeviceNotAvailable(_)) => warn!("Request rejected: {}", e),
                    Err(e) => return Err(fail(e)),
                },
                Step::ClearOverride => manager.clear_override().await.map_err(fail)?,
                Step::WaitMs { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
                Step::ReportRoute { route } => manager.route_reported(*route).await.map_err(fail)?,
            }
        }

        Ok(())
    }
}
