//! CLI domain: parse and route only.
//! Commands dispatch straight into the library; no pipeline logic lives here.

mod parse;
mod route;

pub use parse::{ArtifactCommands, Cli, Commands, QuotaCommands};
pub use route::RunContext;
