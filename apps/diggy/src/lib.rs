//! # diggy
//!
//! Library target of the `diggy` binary. Exposes the CLI module so the
//! command renderers can be tested without spawning a process.

pub mod cli;
