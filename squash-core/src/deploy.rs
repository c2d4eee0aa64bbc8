//! Deploy notifications
//!
//! Tells the server which revision a build/version corresponds to, so
//! occurrences can be matched to source.

use chrono::Local;
use serde::Serialize;

use crate::error::Result;
use crate::transport::Transport;

/// Default path for deploy notifications
pub const DEPLOY_PATH: &str = "/api/1.0/deploy.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployNotice {
    pub project: DeployProject,
    pub environment: DeployEnvironment,
    pub deploy: Deploy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployProject {
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployEnvironment {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deploy {
    pub deployed_at: String,
    pub revision: String,
    pub build: Option<String>,
    pub version: Option<String>,
}

impl DeployNotice {
    /// Notice stamped with the current local time; `version` falls back to
    /// `build` when not given.
    pub fn new(
        api_key: impl Into<String>,
        environment: impl Into<String>,
        revision: impl Into<String>,
        build: Option<String>,
        version: Option<String>,
    ) -> Self {
        let version = version.or_else(|| build.clone());
        Self {
            project: DeployProject {
                api_key: api_key.into(),
            },
            environment: DeployEnvironment {
                name: environment.into(),
            },
            deploy: Deploy {
                deployed_at: Local::now().to_rfc3339(),
                revision: revision.into(),
                build,
                version,
            },
        }
    }
}

/// Post a deploy notice
pub fn notify_deploy(transport: &dyn Transport, path: &str, notice: &DeployNotice) -> Result<()> {
    let body = serde_json::to_value(notice)?;
    transport.transmit(path, &body)?;
    tracing::info!(
        revision = %notice.deploy.revision,
        environment = %notice.environment.name,
        "Deploy recorded"
    );
    Ok(())
}
