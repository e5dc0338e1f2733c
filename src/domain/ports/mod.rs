//! Domain ports (interfaces) for the swarmctl execution substrate.

pub mod command_runner;

pub use command_runner::{CommandOutcome, CommandRunner, CommandRunnerError, CommandSpec, RunningCommand};
