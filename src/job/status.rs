use serde::{Deserialize, Serialize};

/// Lifecycle status of a job.
///
/// `Reserved` (remote reservation) and `Accepted` (pre-resolved confirmation)
/// are alternative entry points that both lead to `Claimed`. From there the
/// job moves through `Init` and `Running` to one of the terminal statuses.
/// Any non-terminal status may also end in `Failed` or `Killed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Reserved,
    Accepted,
    Claimed,
    Init,
    Running,
    Succeeded,
    Failed,
    Killed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Reserved => write!(f, "reserved"),
            JobStatus::Accepted => write!(f, "accepted"),
            JobStatus::Claimed => write!(f, "claimed"),
            JobStatus::Init => write!(f, "init"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Killed => write!(f, "killed"),
        }
    }
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Killed
        )
    }

    /// Statuses a job may start in.
    pub fn is_entry(&self) -> bool {
        matches!(self, JobStatus::Reserved | JobStatus::Accepted)
    }

    /// Whether moving from `self` to `next` follows the transition graph.
    /// Re-asserting the current non-terminal status is allowed so that retried
    /// stages stay idempotent.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        if self.is_terminal() {
            return false;
        }
        if *self == next {
            return true;
        }
        if matches!(next, Failed | Killed) {
            return true;
        }
        matches!(
            (self, next),
            (Reserved, Claimed)
                | (Accepted, Claimed)
                | (Claimed, Init)
                | (Init, Running)
                | (Running, Succeeded)
        )
    }
}
