// ABOUTME: Sandboxed execution runtime for notebook cells
// ABOUTME: One isolated container per project, cooperative cell locks, bounded outputs and crash recovery

pub mod classifier;
pub mod config;
pub mod editor;
pub mod error;
pub mod events;
pub mod manager;
pub mod orchestrator;
pub mod providers;
pub mod runner;
pub mod runtime;
pub mod sandbox;
pub mod workspace;

pub use classifier::{ClassifiedOutputs, OutputClassifier};
pub use config::{ConfigError, RuntimeConfig, SandboxLimits};
pub use editor::CellEditor;
pub use error::{Result, RuntimeError};
pub use events::{BroadcastSink, EventEnvelope, EventSink, NoopSink, NotebookEvent};
pub use manager::{OrphanReport, SandboxManager, TeardownReport};
pub use orchestrator::{ExecutionOrchestrator, RunOutcome, DEFAULT_HOLDER};
pub use providers::{
    ContainerSpec, ContainerSummary, DockerProvider, ExecOutput, ExecRequest, ProviderError,
    SandboxProvider,
};
pub use runtime::Runtime;
pub use sandbox::{
    Completion, ExecuteOptions, ExecutionResult, ExecutionStatus, PackageInfo, PackageOutcome,
    Sandbox,
};
pub use workspace::{sync_datasets, SyncReport};
