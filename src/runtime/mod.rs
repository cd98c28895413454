/// Runtime Execution Layer
///
/// - State machine engine walking a definition to a terminal state
/// - Task invocation with input transforms, timeouts and panic capture
/// - Concurrent dispatch of triggered runs
/// - Background scheduler clock

// State machine engine
pub mod engine;

// Task handler invocation
pub mod executor;

// Event/tick fan-out and manual invocation with sink reporting
pub mod dispatcher;

// tokio-cron-scheduler tick clock
pub mod scheduler;

pub use dispatcher::{Dispatch, Dispatcher};
pub use engine::{EngineConfig, ExecutionEngine, RunFailure, RunResult, RunStatus};
pub use executor::TaskExecutor;
pub use scheduler::CronSchedulerService;
