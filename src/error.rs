//! Error taxonomy for the module link pipeline.
//!
//! Every failure surfaces to the build driver tagged with the module
//! name and the stage it happened in. Nothing is retried or silently
//! defaulted — a malformed environment aborts the module before any
//! build action is registered.

use std::path::PathBuf;

use thiserror::Error;

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Environment derivation (clone + toolchain overrides + flag merge).
    Derive,
    /// Dependency-edge registration against the build graph.
    Register,
    /// Linker invocation producing the relocatable binary.
    Link,
    /// Strip invocation producing the deployable binary.
    Strip,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Derive => "derive",
            Self::Register => "register",
            Self::Link => "link",
            Self::Strip => "strip",
        };
        f.write_str(name)
    }
}

/// A fatal, per-module build failure.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The base environment is malformed: a required variable is
    /// missing or the toolchain flags conflict.
    #[error("module '{module}': configuration error at {stage} stage: {reason}")]
    Configuration {
        module: String,
        stage: Stage,
        reason: String,
    },

    /// The build graph rejected a dependency edge.
    #[error(
        "module '{module}': cannot register dependency of '{artifact}' on '{prerequisite}': {reason}"
    )]
    DependencyRegistration {
        module: String,
        artifact: PathBuf,
        prerequisite: PathBuf,
        reason: String,
    },

    /// Linker exited non-zero. Diagnostics carry the tool's stderr.
    #[error("module '{module}': link failed:\n{diagnostics}")]
    Link { module: String, diagnostics: String },

    /// Stripper failed or the intermediate artifact was missing. Any
    /// partially written final artifact has been deleted.
    #[error("module '{module}': strip failed:\n{diagnostics}")]
    Strip { module: String, diagnostics: String },
}

impl BuildError {
    /// Build a `Configuration` error from any displayable cause.
    pub fn configuration(module: &str, stage: Stage, reason: impl std::fmt::Display) -> Self {
        Self::Configuration {
            module: module.to_string(),
            stage,
            reason: reason.to_string(),
        }
    }

    /// The stage this error is attributed to.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Configuration { stage, .. } => *stage,
            Self::DependencyRegistration { .. } => Stage::Register,
            Self::Link { .. } => Stage::Link,
            Self::Strip { .. } => Stage::Strip,
        }
    }

    /// The module this error belongs to.
    pub fn module(&self) -> &str {
        match self {
            Self::Configuration { module, .. }
            | Self::DependencyRegistration { module, .. }
            | Self::Link { module, .. }
            | Self::Strip { module, .. } => module,
        }
    }
}
