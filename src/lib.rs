//! examgen: bounded-concurrency exam generation.
//!
//! Source documents are uploaded to an external generative service, a deterministic
//! instruction payload is assembled, and one generation call per job runs under a
//! system-wide admission limit and a per-user credit check. Results are saved per user.

pub mod admission;
pub mod artifact;
pub mod assembler;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod provider;
pub mod quota;
pub mod runtime;
pub mod types;
pub mod upload;
