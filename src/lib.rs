//! Module link pipeline for loadable kernel modules.
//!
//! Takes compiled object files and turns them into deployable kernel
//! modules: derives a module-scoped toolchain environment from the base
//! build environment, registers the artifacts' dependencies on the
//! linker script and the shared `libmodule.a` support archive, and
//! schedules link + strip actions on a small build graph.
//!
//! Pipeline: load modules.toml → derive environment → register
//!           dependencies → link action → strip action.

pub mod cache;
pub mod cli;
pub mod config;
pub mod env;
pub mod error;
pub mod executor;
pub mod graph;
pub mod module;
pub mod pipeline;
pub mod tool_cmd;
pub mod verbose;
