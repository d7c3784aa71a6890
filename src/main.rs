//! Module link driver.
//!
//! Reads `modules.toml`, derives a per-module link environment from the
//! base build environment, registers link/strip actions into a build
//! graph, and executes the stale ones in parallel.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;

use modlink::cache::{self, CacheManifest};
use modlink::cli::{self, Cli, Command};
use modlink::config::{self, Manifest};
use modlink::env::BuildEnvironment;
use modlink::executor::{self, ExecuteOptions};
use modlink::graph::{Action, BuildGraph};
use modlink::module::{ModuleSpec, ToolchainMode};
use modlink::pipeline;
use modlink::verbose;

fn main() -> Result<()> {
    let cli = Cli::parse();
    verbose::init(cli.quiet, cli.verbose);

    match cli.command {
        Command::Build(ref args) => cmd_build(&cli, args),
        Command::Plan(ref args) => cmd_plan(&cli, args),
        Command::Clean => cmd_clean(&cli),
    }
}

/// Locate and load the manifest, returning it with its project root.
fn load_manifest(cli: &Cli) -> Result<(Manifest, PathBuf)> {
    let manifest_path = match &cli.manifest {
        Some(path) => path.clone(),
        None => {
            let cwd = std::env::current_dir().context("cannot determine current directory")?;
            config::find_manifest(&cwd).with_context(|| {
                format!("no {} found from '{}' upwards", config::MANIFEST_NAME, cwd.display())
            })?
        }
    };
    let root = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let manifest = Manifest::load(&manifest_path)?;
    Ok((manifest, root))
}

/// Resolve the environment, mode, and (optionally filtered) module
/// list, then register everything into a fresh graph.
fn register_all(
    manifest: &Manifest,
    root: &Path,
    filter: Option<&str>,
) -> Result<(BuildGraph, BuildEnvironment, ToolchainMode)> {
    let mode = manifest.toolchain_mode()?;
    let base = manifest.to_environment(root);
    let specs = select_modules(manifest.module_specs(root), filter)?;

    let mut graph = BuildGraph::new();
    for spec in &specs {
        pipeline::register_module(&mut graph, &base, spec, mode)?;
    }
    Ok((graph, base, mode))
}

fn select_modules(specs: Vec<ModuleSpec>, filter: Option<&str>) -> Result<Vec<ModuleSpec>> {
    match filter {
        None => Ok(specs),
        Some(name) => {
            let selected: Vec<ModuleSpec> =
                specs.into_iter().filter(|s| s.name == name).collect();
            if selected.is_empty() {
                bail!("module '{name}' not found in {}", config::MANIFEST_NAME);
            }
            Ok(selected)
        }
    }
}

// ===========================================================================
// Commands
// ===========================================================================

fn cmd_build(cli: &Cli, args: &cli::BuildArgs) -> Result<()> {
    let (manifest, root) = load_manifest(cli)?;
    let (graph, base, _mode) = register_all(&manifest, &root, args.module.as_deref())?;

    let build_dir = base.build_dir().to_path_buf();
    let mut cache = CacheManifest::load(&build_dir).unwrap_or_else(CacheManifest::new);

    let opts = ExecuteOptions {
        jobs: cli.jobs.unwrap_or(0),
        force: cli.force,
    };
    let result = executor::execute(&graph, &mut cache, &opts);

    // Persist what finished even when the run failed, so a fixed rerun
    // only redoes the broken actions.
    cache.save(&build_dir)?;
    let summary = result?;

    println!(
        "Done: {} actions run, {} up to date, in {:.1?}",
        summary.executed, summary.skipped, summary.elapsed
    );
    Ok(())
}

/// Serializable view of a registered plan.
#[derive(Serialize)]
struct Plan<'a> {
    mode: ToolchainMode,
    actions: &'a [Action],
    edges: Vec<(&'a Path, &'a Path)>,
}

fn cmd_plan(cli: &Cli, args: &cli::PlanArgs) -> Result<()> {
    let (manifest, root) = load_manifest(cli)?;
    let (graph, _base, mode) = register_all(&manifest, &root, args.module.as_deref())?;

    if args.json {
        let plan = Plan {
            mode,
            actions: graph.actions(),
            edges: graph.edges(),
        };
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("mode: {mode:?}");
    for action in graph.actions() {
        println!("[{}] {}", action.module, action.command.display_line());
    }
    for (artifact, prereq) in graph.edges() {
        println!("{} <- {}", artifact.display(), prereq.display());
    }
    Ok(())
}

fn cmd_clean(cli: &Cli) -> Result<()> {
    let (manifest, root) = load_manifest(cli)?;
    let (graph, base, _mode) = register_all(&manifest, &root, None)?;

    let mut removed = 0usize;
    for action in graph.actions() {
        if action.target.exists() {
            fs::remove_file(&action.target)
                .with_context(|| format!("failed to remove '{}'", action.target.display()))?;
            removed += 1;
        }
    }
    let cache_file = cache::manifest_path(base.build_dir());
    if cache_file.exists() {
        fs::remove_file(&cache_file)
            .with_context(|| format!("failed to remove '{}'", cache_file.display()))?;
    }

    println!("Removed {removed} artifacts.");
    Ok(())
}
