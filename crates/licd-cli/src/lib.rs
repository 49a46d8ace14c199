//! # licd-cli — Operator Command-Line Interface
//!
//! ## Subcommands
//!
//! - `validate` — check a tool catalog before handing it to the server
//! - `sign` — produce the signature headers for a borrow request
//!
//! Argument parsing lives in `main.rs`; each module here exposes its
//! `Args` struct, a `run_*` entry point returning the process exit code,
//! and the pure functions behind it.

pub mod signing;
pub mod validate;
