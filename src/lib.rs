//! lintx-runner library
//!
//! This crate provides the sandboxed execution pipeline behind the runner:
//! - Language registry mapping identifiers to compile/run recipes
//! - Per-request staging workspaces with guaranteed cleanup
//! - Container backend with hard deadlines and forced teardown
//! - HTTP and MCP front ends, plus structured critique parsing

pub mod backend;
pub mod config;
pub mod error;
pub mod executor;
pub mod feedback;
pub mod http;
pub mod language;
pub mod mcp;
pub mod workspace;

pub use error::{Error, Result};
pub use executor::{ExecutionProfile, ExecutionResult, Executor, Outcome};
pub use language::{Language, LanguageRecipe};
