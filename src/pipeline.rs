//! Module registration: environment derivation, command assembly, and
//! dependency wiring.
//!
//! [`register_module`] is the whole per-module pipeline up to (but not
//! including) execution. It derives the module environment, resolves
//! the tools, registers the link and strip actions, and wires every
//! artifact to the linker script and the support archive. All failures
//! are reported before any action is registered, so a failing module
//! leaves the graph untouched.

use std::path::Path;

use crate::env::{self, BuildEnvironment, ModuleEnv};
use crate::error::{BuildError, Stage};
use crate::graph::{Action, ActionId, ActionKind, BuildGraph, GraphError};
use crate::module::{ModuleSpec, ToolchainMode};
use crate::tool_cmd::ToolCommand;
use crate::verbose::vprintln;

/// Register the link (and, outside analysis mode, strip) actions for
/// one module. Returns the id of the action producing the final
/// artifact.
pub fn register_module(
    graph: &mut BuildGraph,
    base: &BuildEnvironment,
    spec: &ModuleSpec,
    mode: ToolchainMode,
) -> Result<ActionId, BuildError> {
    // Module extras: the environment-wide MODULE_LINKFLAGS list first,
    // then this module's own flags.
    let mut extras = base.get_list("MODULE_LINKFLAGS");
    extras.extend(spec.extra_linkflags.iter().cloned());

    let menv = env::derive_environment(base, mode, &extras)
        .map_err(|e| BuildError::configuration(&spec.name, Stage::Derive, e))?;

    let link_program = menv
        .link_program()
        .map_err(|e| BuildError::configuration(&spec.name, Stage::Derive, e))?
        .to_string();

    vprintln!(
        "registering module '{}' ({} objects, {:?})",
        spec.name,
        spec.objects.len(),
        menv.linker_script()
    );

    if mode.analysis_only() {
        // Analysis builds skip the strip stage; the link writes the
        // final target directly and the unstripped output keeps the
        // deployable filename. No STRIP binding is needed.
        let link = link_action(&menv, spec, &link_program, &spec.final_target);
        let id = graph
            .add_action(link)
            .map_err(|e| registration_error(spec, &spec.final_target, e))?;

        register_dependencies(graph, spec, &[&spec.final_target], &menv)?;
        return Ok(id);
    }

    // A missing STRIP must fail the module before the link action lands
    // in the graph, not halfway through.
    let strip_program = menv
        .strip_program()
        .map_err(|e| BuildError::configuration(&spec.name, Stage::Derive, e))?
        .to_string();

    let link = link_action(&menv, spec, &link_program, &spec.intermediate_target);
    graph
        .add_action(link)
        .map_err(|e| registration_error(spec, &spec.intermediate_target, e))?;

    let mut strip_cmd = ToolCommand::new(&strip_program);
    strip_cmd
        .flags(["-d", "--strip-unneeded"])
        .out(&spec.final_target)
        .input(&spec.intermediate_target);
    let strip = Action {
        module: spec.name.clone(),
        kind: ActionKind::Strip,
        target: spec.final_target.clone(),
        sources: vec![spec.intermediate_target.clone()],
        command: strip_cmd,
    };
    let final_id = graph
        .add_action(strip)
        .map_err(|e| registration_error(spec, &spec.final_target, e))?;

    register_dependencies(
        graph,
        spec,
        &[&spec.final_target, &spec.intermediate_target],
        &menv,
    )?;

    // Explicit script edge on the relocatable output, independent of
    // the shared wiring above.
    depends(graph, spec, &spec.intermediate_target, menv.script_path())?;

    Ok(final_id)
}

/// Wire each artifact to the linker script and the support archive.
/// Edges are idempotent, so repeated registration of shared
/// prerequisites is harmless.
fn register_dependencies(
    graph: &mut BuildGraph,
    spec: &ModuleSpec,
    artifacts: &[&Path],
    menv: &ModuleEnv,
) -> Result<(), BuildError> {
    let archive = menv.support_archive();
    for artifact in artifacts {
        depends(graph, spec, artifact, menv.script_path())?;
        depends(graph, spec, artifact, &archive)?;
    }
    Ok(())
}

fn depends(
    graph: &mut BuildGraph,
    spec: &ModuleSpec,
    artifact: &Path,
    prerequisite: &Path,
) -> Result<(), BuildError> {
    graph
        .depends(artifact, prerequisite)
        .map_err(|e| BuildError::DependencyRegistration {
            module: spec.name.clone(),
            artifact: artifact.to_path_buf(),
            prerequisite: prerequisite.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Assemble the link invocation:
/// `$LINK $LINKFLAGS -o <target> <objects> -L<paths> -l<libs>`.
fn link_action(menv: &ModuleEnv, spec: &ModuleSpec, program: &str, target: &Path) -> Action {
    let mut cmd = ToolCommand::new(program);
    cmd.flags(menv.linkflags()).out(target);
    for object in &spec.objects {
        cmd.input(object);
    }
    for dir in menv.libpaths() {
        cmd.search_path(&dir);
    }
    for lib in menv.libs() {
        cmd.lib(&lib);
    }

    Action {
        module: spec.name.clone(),
        kind: ActionKind::Link,
        target: target.to_path_buf(),
        sources: spec.objects.clone(),
        command: cmd,
    }
}

fn registration_error(spec: &ModuleSpec, artifact: &Path, err: GraphError) -> BuildError {
    BuildError::DependencyRegistration {
        module: spec.name.clone(),
        artifact: artifact.to_path_buf(),
        prerequisite: artifact.to_path_buf(),
        reason: err.to_string(),
    }
}
