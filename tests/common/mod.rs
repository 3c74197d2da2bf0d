//! Common test utilities for Kiln scenario and CLI tests.
//!
//! This module provides:
//! - `TestProject`: isolated project tree in a temp directory
//! - `RecordingTools`: a toolchain that writes plausible outputs and records calls
//! - `run_kiln`: runs the compiled binary against a project

#![allow(dead_code)]

pub mod env;
pub mod tools;

pub use env::*;
pub use tools::*;
