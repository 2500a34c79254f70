//! Central executor and the commands it runs

pub mod central;
pub mod command;
pub mod task;

pub use central::CentralExecutor;
pub use command::{CommandError, CommandExecutor};
pub use task::{EngineSummaryState, ExecPriority, Task};
