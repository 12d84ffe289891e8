//! CLI commands

mod build;
mod clean;
mod dump;
mod query;

pub use build::BuildCommand;
pub use clean::CleanCommand;
pub use dump::DumpCommand;
pub use query::QueryCommand;
pub use test::TestCommand;
