pub mod adapters;
pub mod dispatcher;
pub mod registry;
pub mod relocation;
pub mod types;
#[cfg(test)]
mod tests;

pub use adapters::{ExecutionAdapter, ExecutionRequest, YtDlpAdapter};
pub use dispatcher::{DispatcherConfig, JobDispatcher, RecoveryStats, SubmitOutcome, SubmitRequest, Submission};
pub use registry::{DeleteSummary, TaskRegistry};
pub use relocation::{ArtifactRelocator, DirectoryRelocator};
pub use types::{FormatParams, JobKind, Signature, Task, TaskStatus, TaskView};

pub use crate::storage::task::TaskStorage;
