//! Agent-side job execution: the per-job context, the stage pipeline and the
//! driver that runs it with retries, backoff and cancellation.

pub mod backoff;
pub mod context;
pub mod driver;
pub mod stage;
pub mod stages;

pub use backoff::Backoff;
pub use context::{
    AttemptRecord, AttemptResult, ContextError, ExecutionContext, ExecutionOutcome, FailureCause, ProcessResult,
    TerminalStatus,
};
pub use driver::{ExecutionProgress, Position, StageDriver};
pub use stage::{ErrorKind, StageError, StageName};
pub use stages::Stage;
