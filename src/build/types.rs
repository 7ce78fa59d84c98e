use std::fmt;

use serde::{Deserialize, Serialize};

/// One task of a build request. Stored and returned verbatim; never run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    #[serde(alias = "Cmd")]
    pub cmd: String,
}

/// Where a build is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    #[default]
    Submitted,
    Pulling,
    LogCaptured,
    ContainerStarting,
    Running,
    Done,
    Failed,
}

impl BuildState {
    fn rank(self) -> u8 {
        match self {
            Self::Submitted => 0,
            Self::Pulling => 1,
            Self::LogCaptured => 2,
            Self::ContainerStarting => 3,
            Self::Running => 4,
            Self::Done | Self::Failed => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether a record in `self` may be republished in `next`.
    ///
    /// Staying put is allowed (log lines are published without a state
    /// change). Terminal states never change.
    pub fn may_advance_to(self, next: BuildState) -> bool {
        if self.is_terminal() {
            return self == next;
        }
        next == Self::Failed || next.rank() >= self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Pulling => "pulling",
            Self::LogCaptured => "log_captured",
            Self::ContainerStarting => "container_starting",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One build attempt, as stored in the registry and returned to clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    #[serde(rename = "uuid")]
    pub id: String,
    pub tasks: Vec<Command>,
    pub project_id: String,
    #[serde(rename = "docker_image")]
    pub image_reference: String,
    #[serde(rename = "ip_address")]
    pub address: String,
    pub done: bool,
    pub logs: Vec<String>,
    #[serde(default)]
    pub state: BuildState,
}

impl BuildRecord {
    /// A freshly submitted build: not done, no address, no logs.
    pub fn submitted(
        id: impl Into<String>,
        image_reference: impl Into<String>,
        project_id: impl Into<String>,
        tasks: Vec<Command>,
    ) -> Self {
        Self {
            id: id.into(),
            tasks,
            project_id: project_id.into(),
            image_reference: image_reference.into(),
            address: String::new(),
            done: false,
            logs: Vec::new(),
            state: BuildState::Submitted,
        }
    }

    /// Mark the build finished with the inspected address.
    pub fn finish(&mut self, address: String) {
        if self.address.is_empty() {
            self.address = address;
        }
        self.done = true;
        self.state = BuildState::Done;
    }

    /// Mark the build failed, recording `reason` as the last log line.
    pub fn fail(&mut self, reason: impl fmt::Display) {
        self.logs.push(format!("error: {reason}"));
        self.done = true;
        self.state = BuildState::Failed;
    }

    /// Explain why `self` may not replace `previous`, if it may not.
    ///
    /// Identity fields are immutable, `done` and `address` are monotone,
    /// `logs` only grows at the end and `state` only moves forward.
    pub fn regression_from(&self, previous: &BuildRecord) -> Option<&'static str> {
        if self.project_id != previous.project_id
            || self.image_reference != previous.image_reference
            || self.tasks != previous.tasks
        {
            return Some("immutable fields changed");
        }
        if previous.done && !self.done {
            return Some("done reverted to false");
        }
        if !previous.address.is_empty() && self.address != previous.address {
            return Some("address changed after being set");
        }
        if !self.logs.starts_with(&previous.logs) {
            return Some("logs are append-only");
        }
        if !previous.state.may_advance_to(self.state) {
            return Some("state moved backwards");
        }
        None
    }
}
