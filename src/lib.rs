//! Library interface for micasa
//!
//! micasa installs command-line tools from declarative formulas. A formula says, per
//! platform, which tool obtains the package: the system package manager, Homebrew, a
//! vendor install script, or a GitHub release archive. The engine detects the running
//! platform, picks the formula's most specific matching entry and hands it to the
//! matching driver.
//!
//! The CLI lives in `main.rs`; everything it does goes through this library.

pub mod command;
pub mod commands;
pub mod config;
pub mod distribute;
pub mod download;
pub mod drivers;
pub mod error;
pub mod extract;
pub mod factory;
pub mod formula;
pub mod github;
pub mod manifest;
pub mod output;
pub mod platform;
pub mod seeker;
pub mod version;

pub use error::{MicasaError, Result};
