use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Fields shared by every inventory record that criteria can be matched against.
pub trait Resource {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    /// Status in its canonical upper-case form (e.g. `UP`, `ACTIVE`).
    fn status(&self) -> &str;
    fn tags(&self) -> &BTreeSet<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterStatus {
    Up,
    OutOfService,
    Terminated,
}

impl ClusterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStatus::Up => "UP",
            ClusterStatus::OutOfService => "OUT_OF_SERVICE",
            ClusterStatus::Terminated => "TERMINATED",
        }
    }
}

impl std::fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Active,
    Deprecated,
    Inactive,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Active => "ACTIVE",
            CommandStatus::Deprecated => "DEPRECATED",
            CommandStatus::Inactive => "INACTIVE",
        }
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An execution cluster. `commands` holds command ids in priority order:
/// earlier entries are preferred when several commands could serve a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub name: String,
    pub version: String,
    pub status: ClusterStatus,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub setup_file: Option<String>,
    #[serde(default)]
    pub configs: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Cluster {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        status: ClusterStatus,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            status,
            tags: BTreeSet::new(),
            commands: Vec::new(),
            setup_file: None,
            configs: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_commands<I, S>(mut self, command_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands.extend(command_ids.into_iter().map(Into::into));
        self
    }

    pub fn with_setup_file(mut self, setup_file: impl Into<String>) -> Self {
        self.setup_file = Some(setup_file.into());
        self
    }

    pub fn with_configs<I, S>(mut self, configs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.configs.extend(configs.into_iter().map(Into::into));
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
}

impl Resource for Cluster {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn status(&self) -> &str {
        self.status.as_str()
    }

    fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }
}

/// A command that can run on one or more clusters. `executable` is the argv
/// prefix the job's own arguments are appended to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    pub name: String,
    pub version: String,
    pub status: CommandStatus,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub executable: Vec<String>,
    #[serde(default)]
    pub setup_file: Option<String>,
    #[serde(default)]
    pub configs: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Command {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        status: CommandStatus,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            status,
            tags: BTreeSet::new(),
            executable: Vec::new(),
            setup_file: None,
            configs: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_executable<I, S>(mut self, executable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.executable = executable.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_setup_file(mut self, setup_file: impl Into<String>) -> Self {
        self.setup_file = Some(setup_file.into());
        self
    }

    pub fn with_configs<I, S>(mut self, configs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.configs.extend(configs.into_iter().map(Into::into));
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
}

impl Resource for Command {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn status(&self) -> &str {
        self.status.as_str()
    }

    fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }
}
