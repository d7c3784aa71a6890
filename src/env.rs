//! Build environments and the module environment deriver.
//!
//! A [`BuildEnvironment`] is the variable mapping the wider OS build
//! hands us: toolchain bindings, preprocessor definitions, and the
//! build output directory. Deriving a module environment clones the
//! base (the base is never mutated), repoints the toolchain variables
//! at their `TARGET_*` counterparts, selects the linker script, and
//! merges the module link/library flags.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::module::{LinkerScript, ToolchainMode};

/// Link-flag baseline for the clang cross toolchain. Native builds
/// start from an empty baseline so modules never inherit kernel-wide
/// link flags.
pub const CLANG_CROSS_BASE_LINKFLAGS: &[&str] = &[
    "--rtlib=libgcc",
    "-fuse-ld=lld",
    "-Wno-unused-command-line-argument",
];

/// The four flags every module link gets, before `-Wl,-T,<script>` is
/// appended with the resolved script path.
const MODULE_LINKFLAGS: &[&str] = &["-nodefaultlibs", "-nostartfiles", "-r"];

/// Preprocessor marker telling module sources they are compiled into
/// the in-kernel address space.
pub const IN_KERNEL_DEFINE: &str = "IN_KERNEL";

/// Definition that switches module linking to the static-drivers script.
pub const STATIC_DRIVERS_DEFINE: &str = "STATIC_DRIVERS";

/// Toolchain variables repointed at their `TARGET_*` counterparts when
/// deriving a module environment.
const TARGET_OVERRIDES: &[&str] = &["CC", "CXX", "LINK", "CFLAGS", "CCFLAGS", "CXXFLAGS"];

/// Lookup failure in a build environment.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("required variable '{0}' is not set")]
    MissingVar(String),
    #[error("variable '{0}' is a list, expected a single value")]
    NotAString(String),
    #[error("flag 'clang_analyse' requires 'clang_cross'")]
    ConflictingFlags,
}

/// A single environment entry: a plain string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    List(Vec<String>),
}

impl Value {
    /// View this value as a flag list. A plain string is a one-element list.
    pub fn as_list(&self) -> Vec<String> {
        match self {
            Self::Str(s) => vec![s.clone()],
            Self::List(items) => items.clone(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

/// Toolchain and linker configuration for one build.
///
/// Cloning yields an independent copy; mutating a derived environment
/// never affects the environment it was cloned from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildEnvironment {
    /// Project root; linker scripts are resolved against it.
    root: PathBuf,
    /// Build output directory; `<build_dir>/modules` holds module
    /// artifacts and the `libmodule.a` support archive.
    build_dir: PathBuf,
    vars: BTreeMap<String, Value>,
    defines: BTreeSet<String>,
}

impl BuildEnvironment {
    /// Create an empty environment rooted at `root`, with build output
    /// under `build_dir`.
    pub fn new(root: impl Into<PathBuf>, build_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            build_dir: build_dir.into(),
            vars: BTreeMap::new(),
            defines: BTreeSet::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Directory holding module artifacts and the support archive.
    pub fn modules_dir(&self) -> PathBuf {
        self.build_dir.join("modules")
    }

    /// Path of the shared prebuilt `libmodule.a` support archive.
    pub fn support_archive(&self) -> PathBuf {
        self.modules_dir().join("libmodule.a")
    }

    /// Overwrite a variable.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.vars.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Look up a variable that must be present.
    pub fn required(&self, name: &str) -> Result<&Value, EnvError> {
        self.vars
            .get(name)
            .ok_or_else(|| EnvError::MissingVar(name.to_string()))
    }

    /// Look up a variable that must be a single string (tool bindings
    /// like `LINK` and `STRIP`).
    pub fn get_str(&self, name: &str) -> Result<&str, EnvError> {
        match self.required(name)? {
            Value::Str(s) => Ok(s),
            Value::List(_) => Err(EnvError::NotAString(name.to_string())),
        }
    }

    /// Look up a list-valued variable; absent means empty.
    pub fn get_list(&self, name: &str) -> Vec<String> {
        self.vars.get(name).map(Value::as_list).unwrap_or_default()
    }

    /// Append to a list-valued variable instead of overwriting it.
    /// A plain-string entry is promoted to a list first.
    pub fn append(&mut self, name: &str, items: impl IntoIterator<Item = String>) {
        let merged = match self.vars.remove(name) {
            Some(existing) => {
                let mut list = existing.as_list();
                list.extend(items);
                list
            }
            None => items.into_iter().collect(),
        };
        self.vars.insert(name.to_string(), Value::List(merged));
    }

    pub fn add_define(&mut self, define: &str) {
        self.defines.insert(define.to_string());
    }

    pub fn has_define(&self, define: &str) -> bool {
        self.defines.contains(define)
    }
}

/// A module-scoped environment produced by [`derive_environment`],
/// together with the linker-script choice made for it. The choice is
/// fixed for the lifetime of the module build.
#[derive(Debug, Clone)]
pub struct ModuleEnv {
    env: BuildEnvironment,
    script: LinkerScript,
    script_path: PathBuf,
    mode: ToolchainMode,
}

impl ModuleEnv {
    pub fn mode(&self) -> ToolchainMode {
        self.mode
    }

    pub fn linker_script(&self) -> LinkerScript {
        self.script
    }

    /// Resolved path of the chosen linker script.
    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    pub fn support_archive(&self) -> PathBuf {
        self.env.support_archive()
    }

    /// The linker binary (`LINK`, already repointed to `TARGET_LINK`).
    pub fn link_program(&self) -> Result<&str, EnvError> {
        self.env.get_str("LINK")
    }

    /// The stripper binary. `STRIP` is carried from the base
    /// environment untouched; there is no `TARGET_` variant.
    pub fn strip_program(&self) -> Result<&str, EnvError> {
        self.env.get_str("STRIP")
    }

    pub fn linkflags(&self) -> Vec<String> {
        self.env.get_list("LINKFLAGS")
    }

    pub fn libs(&self) -> Vec<String> {
        self.env.get_list("LIBS")
    }

    pub fn libpaths(&self) -> Vec<String> {
        self.env.get_list("LIBPATH")
    }

    pub fn env(&self) -> &BuildEnvironment {
        &self.env
    }
}

/// Derive a module-scoped environment from the base build environment.
///
/// Pure derivation: the base is cloned and never mutated, and no I/O
/// happens here. A missing `TARGET_*` binding is an error — a malformed
/// base environment must abort the module before any build action is
/// registered, not be silently defaulted.
pub fn derive_environment(
    base: &BuildEnvironment,
    mode: ToolchainMode,
    extra_linkflags: &[String],
) -> Result<ModuleEnv, EnvError> {
    let mut env = base.clone();

    // Repoint the toolchain from build-host tools to target-platform tools.
    for key in TARGET_OVERRIDES {
        let target_key = format!("TARGET_{key}");
        let value = base.required(&target_key)?.clone();
        env.set(key, value);
    }

    let script = if base.has_define(STATIC_DRIVERS_DEFINE) {
        LinkerScript::Static
    } else {
        LinkerScript::Dynamic
    };
    let script_path = base.root().join(script.rel_path());

    // Link-flag baseline, then the fixed module flags, then any
    // module-specific extras. Overwriting LINKFLAGS (rather than
    // appending) wipes inherited kernel-wide link flags.
    let mut linkflags: Vec<String> = match mode {
        ToolchainMode::ClangCross | ToolchainMode::ClangCrossAnalysisOnly => {
            CLANG_CROSS_BASE_LINKFLAGS
                .iter()
                .map(|s| s.to_string())
                .collect()
        }
        ToolchainMode::Native => Vec::new(),
    };
    linkflags.extend(MODULE_LINKFLAGS.iter().map(|s| s.to_string()));
    linkflags.push(format!("-Wl,-T,{}", script_path.display()));
    linkflags.extend(extra_linkflags.iter().cloned());
    env.set("LINKFLAGS", linkflags);

    env.append("LIBS", ["module".to_string(), "gcc".to_string()]);
    env.append(
        "LIBPATH",
        [env.modules_dir().display().to_string()],
    );
    env.add_define(IN_KERNEL_DEFINE);

    Ok(ModuleEnv {
        env,
        script,
        script_path,
        mode,
    })
}
