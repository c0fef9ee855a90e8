//! Built-in tools and tool plumbing for the tether runtime:
//! the registry the orchestrator dispatches through, the runaway-loop
//! detector, the result truncator, and thin exec/process/file tools.

pub mod exec;
pub mod file_ops;
pub mod loop_guard;
pub mod process;
pub mod registry;
pub mod truncate;

pub use loop_guard::{LoopDetector, LoopIssue, LoopStats};
pub use process::ProcessManager;
pub use registry::{Tool, ToolRegistry};
pub use truncate::{truncate_value, TruncationMarker};
