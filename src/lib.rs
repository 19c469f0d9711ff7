pub mod commands;
pub mod repl;

pub use commands::{Command, CommandError};
