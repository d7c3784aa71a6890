//! Project manifest (`modules.toml`) loading and resolution.
//!
//! The manifest declares the base build environment (toolchain
//! bindings, defines, toolchain mode flags) and the list of modules to
//! link. Resolution turns it into a [`BuildEnvironment`] plus
//! [`ModuleSpec`]s with default artifact paths filled in.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::env::{BuildEnvironment, Value};
use crate::module::{ModuleSpec, ToolchainMode};

/// Manifest filename searched for when no explicit path is given.
pub const MANIFEST_NAME: &str = "modules.toml";

/// Top-level `modules.toml` layout.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub env: EnvSection,
    #[serde(default, rename = "module")]
    pub modules: Vec<ModuleSection>,
}

/// `[env]`: the base build environment.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvSection {
    /// Build output directory, relative to the project root.
    #[serde(rename = "build-dir", default = "default_build_dir")]
    pub build_dir: PathBuf,
    /// Preprocessor-style definitions (`STATIC_DRIVERS` switches the
    /// linker script).
    #[serde(default)]
    pub defines: Vec<String>,
    /// Use the clang cross toolchain baseline.
    #[serde(rename = "clang-cross", default)]
    pub clang_cross: bool,
    /// Analysis builds: link unstripped, skip the strip stage.
    #[serde(rename = "clang-analyse", default)]
    pub clang_analyse: bool,
    /// Variable bindings (`TARGET_CC`, `TARGET_LINK`, `STRIP`, ...).
    /// Values are strings or lists of strings.
    #[serde(default)]
    pub vars: BTreeMap<String, Value>,
}

fn default_build_dir() -> PathBuf {
    PathBuf::from("build")
}

/// One `[[module]]` entry.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleSection {
    pub name: String,
    /// Object files, in link order, relative to the project root.
    pub objects: Vec<PathBuf>,
    /// Extra link flags appended after the standard module set.
    #[serde(default)]
    pub linkflags: Vec<String>,
    /// Final artifact override; defaults to
    /// `<build-dir>/modules/<name>.kmod`.
    pub target: Option<PathBuf>,
    /// Intermediate artifact override; defaults to
    /// `<build-dir>/modules/obj/<name>.o`.
    pub intermediate: Option<PathBuf>,
}

impl Manifest {
    /// Parse a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read '{}'", path.display()))?;
        let manifest: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse '{}'", path.display()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for module in &self.modules {
            if module.name.is_empty() {
                bail!("module with empty name");
            }
            if !seen.insert(module.name.as_str()) {
                bail!("duplicate module '{}'", module.name);
            }
            if module.objects.is_empty() {
                bail!("module '{}' has no objects", module.name);
            }
        }
        Ok(())
    }

    /// Toolchain mode from the `[env]` flags.
    pub fn toolchain_mode(&self) -> Result<ToolchainMode> {
        ToolchainMode::from_flags(self.env.clang_cross, self.env.clang_analyse)
            .map_err(Into::into)
    }

    /// Materialize the base build environment, rooted at `root`.
    pub fn to_environment(&self, root: &Path) -> BuildEnvironment {
        let build_dir = root.join(&self.env.build_dir);
        let mut env = BuildEnvironment::new(root, build_dir);
        for (name, value) in &self.env.vars {
            env.set(name, value.clone());
        }
        for define in &self.env.defines {
            env.add_define(define);
        }
        env
    }

    /// Resolve the `[[module]]` entries into build descriptions, with
    /// default artifact paths under `<build-dir>/modules`.
    pub fn module_specs(&self, root: &Path) -> Vec<ModuleSpec> {
        let modules_dir = root.join(&self.env.build_dir).join("modules");
        self.modules
            .iter()
            .map(|m| {
                let final_target = match &m.target {
                    Some(t) => root.join(t),
                    None => modules_dir.join(format!("{}.kmod", m.name)),
                };
                let intermediate_target = match &m.intermediate {
                    Some(t) => root.join(t),
                    None => modules_dir.join("obj").join(format!("{}.o", m.name)),
                };
                ModuleSpec {
                    name: m.name.clone(),
                    final_target,
                    intermediate_target,
                    objects: m.objects.iter().map(|o| root.join(o)).collect(),
                    extra_linkflags: m.linkflags.clone(),
                }
            })
            .collect()
    }
}

/// Walk up from `start` looking for a `modules.toml`.
pub fn find_manifest(start: &Path) -> Option<PathBuf> {
    let mut dir = start;
    loop {
        let candidate = dir.join(MANIFEST_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
}
