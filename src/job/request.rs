use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};
use crate::inventory::{Cluster, Command, Criterion};

/// A job submission: what to run and the abstract resources it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Id the submitter would like the job to get. Reservation fails if taken.
    #[serde(default)]
    pub requested_id: Option<String>,
    pub name: String,
    pub user: String,
    /// Ordered by preference; the first criterion that resolves wins.
    pub cluster_criteria: Vec<Criterion>,
    pub command_criterion: Criterion,
    /// Appended to the resolved command's executable.
    #[serde(default)]
    pub command_args: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub setup_file: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl JobRequest {
    pub fn new(
        name: impl Into<String>,
        user: impl Into<String>,
        cluster_criteria: Vec<Criterion>,
        command_criterion: Criterion,
    ) -> Result<Self> {
        if cluster_criteria.is_empty() {
            return Err(DispatchError::InvalidRequest(
                "at least one cluster criterion is required".to_string(),
            ));
        }
        Ok(Self {
            requested_id: None,
            name: name.into(),
            user: user.into(),
            cluster_criteria,
            command_criterion,
            command_args: Vec::new(),
            dependencies: Vec::new(),
            setup_file: None,
            environment: BTreeMap::new(),
            timeout_secs: None,
        })
    }

    pub fn with_requested_id(mut self, id: impl Into<String>) -> Self {
        self.requested_id = Some(id.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn with_setup_file(mut self, setup_file: impl Into<String>) -> Self {
        self.setup_file = Some(setup_file.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }
}

/// Identifies the agent process that submits and runs a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub hostname: String,
    pub version: String,
    pub pid: u32,
}

impl ClientMetadata {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
        }
    }
}

/// Everything the agent needs to run a job once resources are resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpecification {
    pub job_id: String,
    pub cluster: Cluster,
    pub command: Command,
    pub command_args: Vec<String>,
    pub dependencies: Vec<String>,
    pub setup_file: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub timeout_secs: Option<u64>,
}

impl JobSpecification {
    pub fn new(job_id: impl Into<String>, request: &JobRequest, cluster: Cluster, command: Command) -> Self {
        Self {
            job_id: job_id.into(),
            cluster,
            command,
            command_args: request.command_args.clone(),
            dependencies: request.dependencies.clone(),
            setup_file: request.setup_file.clone(),
            environment: request.environment.clone(),
            timeout_secs: request.timeout_secs,
        }
    }

    /// Full argv: the command's executable followed by the job arguments.
    pub fn argv(&self) -> Vec<String> {
        self.command
            .executable
            .iter()
            .chain(self.command_args.iter())
            .cloned()
            .collect()
    }
}
