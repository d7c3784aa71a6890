//! Module build descriptions: what to link, and with which toolchain.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::env::EnvError;

/// One loadable kernel module to be linked and stripped.
#[derive(Debug, Clone)]
pub struct ModuleSpec {
    pub name: String,
    /// Deployable artifact (stripped in normal mode, link output in
    /// analysis mode — same filename contract either way).
    pub final_target: PathBuf,
    /// Relocatable link output, consumed by the strip stage.
    pub intermediate_target: PathBuf,
    /// Object files, in link order.
    pub objects: Vec<PathBuf>,
    /// Module-specific link flags, appended after the standard set.
    pub extra_linkflags: Vec<String>,
}

/// Which toolchain the module build uses, and whether the strip stage
/// runs at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolchainMode {
    /// Natively-targeted toolchain; link then strip.
    Native,
    /// Clang cross toolchain; link then strip, with the cross link-flag
    /// baseline.
    ClangCross,
    /// Clang cross toolchain, analysis builds only: link straight to
    /// the final target and skip the strip stage. Never used for
    /// production artifacts.
    ClangCrossAnalysisOnly,
}

impl ToolchainMode {
    /// Resolve the mode from the `clang_cross` / `clang_analyse`
    /// configuration flags. Analysis mode is only defined for the cross
    /// toolchain, so `clang_analyse` without `clang_cross` conflicts.
    pub fn from_flags(clang_cross: bool, clang_analyse: bool) -> Result<Self, EnvError> {
        match (clang_cross, clang_analyse) {
            (false, false) => Ok(Self::Native),
            (true, false) => Ok(Self::ClangCross),
            (true, true) => Ok(Self::ClangCrossAnalysisOnly),
            (false, true) => Err(EnvError::ConflictingFlags),
        }
    }

    /// Whether the link skips the strip stage and writes the final
    /// target directly.
    pub fn analysis_only(self) -> bool {
        self == Self::ClangCrossAnalysisOnly
    }
}

/// Which linker script directs the module's section layout. Chosen once
/// per module build from the `STATIC_DRIVERS` definition and immutable
/// afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkerScript {
    Dynamic,
    Static,
}

impl LinkerScript {
    /// Script location relative to the project root.
    pub fn rel_path(self) -> &'static Path {
        match self {
            Self::Dynamic => Path::new("modules/link.ld"),
            Self::Static => Path::new("modules/link_static.ld"),
        }
    }
}
