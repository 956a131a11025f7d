//! Pre-start sync hook.
//!
//! An application can run a smart sync before it starts serving, so a
//! developer machine picks up rows created in the cloud database and pushes
//! its own. The hook never fails its caller: whatever happens is returned as
//! a [`StartupOutcome`] and logged.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::connection::Connector;
use crate::models::SyncDirection;
use crate::report::SyncReport;
use crate::sync_engine::SyncEngine;

/// Where the calling application is running. Passed in explicitly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentProfile {
    /// A developer machine with its own local database.
    LocalDevelopment,
    /// A hosted deployment that talks to the remote database directly.
    Hosted,
}

impl std::fmt::Display for DeploymentProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalDevelopment => write!(f, "local-development"),
            Self::Hosted => write!(f, "hosted"),
        }
    }
}

impl std::str::FromStr for DeploymentProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local-development" | "local" => Ok(Self::LocalDevelopment),
            "hosted" => Ok(Self::Hosted),
            other => Err(format!(
                "unknown deployment profile '{other}': use local-development or hosted"
            )),
        }
    }
}

/// What the pre-start hook did.
#[derive(Debug)]
pub enum StartupOutcome {
    /// Not a local development deployment; nothing was attempted.
    Skipped,
    /// The sync ran to completion (successfully or not).
    Completed(SyncReport),
    /// The sync did not finish within the startup timeout.
    TimedOut,
}

/// Run a smart sync when `profile` is [`DeploymentProfile::LocalDevelopment`],
/// bounded by `sync.startup_timeout_secs`.
pub async fn run_pre_start_sync(
    config: &SyncConfig,
    profile: DeploymentProfile,
    connector: Arc<dyn Connector>,
) -> StartupOutcome {
    if profile != DeploymentProfile::LocalDevelopment {
        info!(%profile, "skipping pre-start database sync");
        return StartupOutcome::Skipped;
    }

    let limit = config.sync.startup_timeout();
    info!(timeout_secs = limit.as_secs(), "running pre-start database sync");
    let engine = SyncEngine::new(config.clone(), connector);

    match tokio::time::timeout(limit, engine.run(SyncDirection::SmartSync)).await {
        Ok(report) => {
            if report.is_success() {
                info!("pre-start database sync completed");
            } else {
                warn!(status = %report.status_line(), "pre-start database sync completed with errors");
            }
            StartupOutcome::Completed(report)
        }
        Err(_) => {
            warn!(
                timeout_secs = limit.as_secs(),
                "pre-start database sync timed out; continuing startup"
            );
            StartupOutcome::TimedOut
        }
    }
}
