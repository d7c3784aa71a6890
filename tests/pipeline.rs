//! End-to-end tests for the module link pipeline.
//!
//! These tests run the real registration and executor paths against a
//! fixture project in a temp directory, with shell-script stand-ins for
//! the linker and stripper. No actual toolchain is required.

#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use modlink::cache::CacheManifest;
use modlink::env::BuildEnvironment;
use modlink::error::BuildError;
use modlink::executor::{self, ExecuteOptions};
use modlink::graph::BuildGraph;
use modlink::module::{ModuleSpec, ToolchainMode};
use modlink::pipeline;

/// A throwaway project tree with stub tools, a linker script, a support
/// archive, and one object file per module.
struct Fixture {
    root: PathBuf,
}

impl Fixture {
    fn new(tag: &str) -> Self {
        let root = std::env::temp_dir().join(format!(
            "modlink-it-{tag}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(root.join("modules")).unwrap();
        fs::create_dir_all(root.join("build/modules")).unwrap();
        fs::create_dir_all(root.join("obj")).unwrap();

        fs::write(root.join("modules/link.ld"), "SECTIONS {}\n").unwrap();
        fs::write(root.join("modules/link_static.ld"), "SECTIONS {}\n").unwrap();
        fs::write(root.join("build/modules/libmodule.a"), "!<arch>\n").unwrap();

        // fake-ld: record the full command line into the -o target.
        write_tool(
            &root.join("fake-ld"),
            r#"#!/bin/sh
out=""
prev=""
for a in "$@"; do
  if [ "$prev" = "-o" ]; then out="$a"; fi
  prev="$a"
done
echo "linked: $@" > "$out"
"#,
        );

        // fake-strip: copy the last argument to the -o target with a marker.
        write_tool(
            &root.join("fake-strip"),
            r#"#!/bin/sh
out=""
prev=""
last=""
for a in "$@"; do
  if [ "$prev" = "-o" ]; then out="$a"; fi
  prev="$a"
  last="$a"
done
cat "$last" > "$out"
echo "stripped" >> "$out"
"#,
        );

        // fake-strip-broken: leave a truncated output behind and fail.
        write_tool(
            &root.join("fake-strip-broken"),
            r#"#!/bin/sh
out=""
prev=""
for a in "$@"; do
  if [ "$prev" = "-o" ]; then out="$a"; fi
  prev="$a"
done
echo "partial" > "$out"
echo "stub strip: cannot process input" >&2
exit 1
"#,
        );

        Self { root }
    }

    fn base_env(&self) -> BuildEnvironment {
        let mut env = BuildEnvironment::new(&self.root, self.root.join("build"));
        env.set("TARGET_CC", "cc");
        env.set("TARGET_CXX", "c++");
        env.set(
            "TARGET_LINK",
            &*self.root.join("fake-ld").display().to_string(),
        );
        env.set("TARGET_CFLAGS", Vec::<String>::new());
        env.set("TARGET_CCFLAGS", Vec::<String>::new());
        env.set("TARGET_CXXFLAGS", Vec::<String>::new());
        env.set(
            "STRIP",
            &*self.root.join("fake-strip").display().to_string(),
        );
        env
    }

    fn module(&self, name: &str) -> ModuleSpec {
        let object = self.root.join(format!("obj/{name}.o"));
        fs::write(&object, format!("object for {name}\n")).unwrap();
        ModuleSpec {
            name: name.to_string(),
            final_target: self.root.join(format!("build/modules/{name}.kmod")),
            intermediate_target: self.root.join(format!("build/modules/obj/{name}.o")),
            objects: vec![object],
            extra_linkflags: vec![],
        }
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn write_tool(path: &Path, script: &str) {
    use std::os::unix::fs::PermissionsExt;
    fs::write(path, script).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn run(
    graph: &BuildGraph,
    cache: &mut CacheManifest,
) -> anyhow::Result<executor::ExecuteSummary> {
    executor::execute(graph, cache, &ExecuteOptions::default())
}

fn bump_mtime(path: &Path) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(5))
        .unwrap();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn normal_build_links_and_strips() {
    let fx = Fixture::new("normal");
    let spec = fx.module("vfs");

    let mut graph = BuildGraph::new();
    pipeline::register_module(&mut graph, &fx.base_env(), &spec, ToolchainMode::Native).unwrap();

    let mut cache = CacheManifest::new();
    let summary = run(&graph, &mut cache).unwrap();

    assert_eq!(summary.executed, 2);
    assert_eq!(summary.skipped, 0);
    assert!(spec.intermediate_target.exists());
    assert!(spec.final_target.exists());

    let final_content = fs::read_to_string(&spec.final_target).unwrap();
    assert!(final_content.contains("linked:"));
    assert!(final_content.contains("stripped"));
    // The link ran with the module flag set and the library wiring.
    assert!(final_content.contains("-nodefaultlibs"));
    assert!(final_content.contains("-r"));
    assert!(final_content.contains("-lmodule"));
    assert!(final_content.contains("-lgcc"));
}

#[test]
fn second_run_is_fully_cached() {
    let fx = Fixture::new("cached");
    let spec = fx.module("net");

    let mut graph = BuildGraph::new();
    pipeline::register_module(&mut graph, &fx.base_env(), &spec, ToolchainMode::Native).unwrap();

    let mut cache = CacheManifest::new();
    let first = run(&graph, &mut cache).unwrap();
    assert_eq!(first.executed, 2);

    let second = run(&graph, &mut cache).unwrap();
    assert_eq!(second.executed, 0);
    assert_eq!(second.skipped, 2);
}

#[test]
fn modified_linker_script_relinks_everything() {
    let fx = Fixture::new("script-edit");
    let spec = fx.module("ext2");

    let mut graph = BuildGraph::new();
    pipeline::register_module(&mut graph, &fx.base_env(), &spec, ToolchainMode::Native).unwrap();

    let mut cache = CacheManifest::new();
    run(&graph, &mut cache).unwrap();

    // Content change; no mtime manipulation needed, the hash catches it
    // even within the same second.
    fs::write(
        fx.root.join("modules/link.ld"),
        "SECTIONS { .text : { *(.text) } }\n",
    )
    .unwrap();
    let rerun = run(&graph, &mut cache).unwrap();
    assert_eq!(rerun.executed, 2);
    assert_eq!(rerun.skipped, 0);
}

#[test]
fn modified_support_archive_relinks_everything() {
    let fx = Fixture::new("archive-edit");
    let spec = fx.module("usb");

    let mut graph = BuildGraph::new();
    pipeline::register_module(&mut graph, &fx.base_env(), &spec, ToolchainMode::Native).unwrap();

    let mut cache = CacheManifest::new();
    run(&graph, &mut cache).unwrap();

    fs::write(
        fx.root.join("build/modules/libmodule.a"),
        "!<arch>\nrebuilt\n",
    )
    .unwrap();
    let rerun = run(&graph, &mut cache).unwrap();
    assert_eq!(rerun.executed, 2);
}

#[test]
fn touched_but_unchanged_script_stays_cached() {
    let fx = Fixture::new("script-touch");
    let spec = fx.module("fat");

    let mut graph = BuildGraph::new();
    pipeline::register_module(&mut graph, &fx.base_env(), &spec, ToolchainMode::Native).unwrap();

    let mut cache = CacheManifest::new();
    run(&graph, &mut cache).unwrap();

    bump_mtime(&fx.root.join("modules/link.ld"));
    let rerun = run(&graph, &mut cache).unwrap();
    assert_eq!(rerun.executed, 0);
    assert_eq!(rerun.skipped, 2);
}

#[test]
fn force_ignores_the_cache() {
    let fx = Fixture::new("force");
    let spec = fx.module("snd");

    let mut graph = BuildGraph::new();
    pipeline::register_module(&mut graph, &fx.base_env(), &spec, ToolchainMode::Native).unwrap();

    let mut cache = CacheManifest::new();
    run(&graph, &mut cache).unwrap();

    let opts = ExecuteOptions {
        jobs: 0,
        force: true,
    };
    let rerun = executor::execute(&graph, &mut cache, &opts).unwrap();
    assert_eq!(rerun.executed, 2);
}

#[test]
fn analysis_build_skips_strip_and_intermediate() {
    let fx = Fixture::new("analysis");
    let spec = fx.module("scsi");

    let mut graph = BuildGraph::new();
    pipeline::register_module(
        &mut graph,
        &fx.base_env(),
        &spec,
        ToolchainMode::ClangCrossAnalysisOnly,
    )
    .unwrap();

    let mut cache = CacheManifest::new();
    let summary = run(&graph, &mut cache).unwrap();

    assert_eq!(summary.executed, 1);
    assert!(spec.final_target.exists());
    assert!(!spec.intermediate_target.exists());

    // The unstripped link output sits at the deployable path, carrying
    // the cross baseline flags.
    let content = fs::read_to_string(&spec.final_target).unwrap();
    assert!(content.contains("linked:"));
    assert!(!content.contains("stripped"));
    assert!(content.contains("-fuse-ld=lld"));
}

#[test]
fn failed_strip_removes_partial_output() {
    let fx = Fixture::new("strip-fail");
    let spec = fx.module("bad");

    let mut env = fx.base_env();
    env.set(
        "STRIP",
        &*fx.root.join("fake-strip-broken").display().to_string(),
    );

    let mut graph = BuildGraph::new();
    pipeline::register_module(&mut graph, &env, &spec, ToolchainMode::Native).unwrap();

    let mut cache = CacheManifest::new();
    let err = run(&graph, &mut cache).unwrap_err();

    let build_err = err
        .downcast_ref::<BuildError>()
        .expect("executor error should be a BuildError");
    assert!(matches!(build_err, BuildError::Strip { module, .. } if module == "bad"));
    assert!(err.to_string().contains("cannot process input"));

    // The link output survives; the truncated final artifact does not.
    assert!(spec.intermediate_target.exists());
    assert!(!spec.final_target.exists());
}

#[test]
fn failed_link_reports_the_module() {
    let fx = Fixture::new("link-fail");
    let spec = fx.module("nolinker");

    let mut env = fx.base_env();
    env.set(
        "TARGET_LINK",
        &*fx.root.join("does-not-exist").display().to_string(),
    );

    let mut graph = BuildGraph::new();
    pipeline::register_module(&mut graph, &env, &spec, ToolchainMode::Native).unwrap();

    let mut cache = CacheManifest::new();
    let err = run(&graph, &mut cache).unwrap_err();
    let build_err = err
        .downcast_ref::<BuildError>()
        .expect("executor error should be a BuildError");
    assert!(matches!(build_err, BuildError::Link { module, .. } if module == "nolinker"));
}

#[test]
fn two_modules_share_prerequisites_without_conflict() {
    let fx = Fixture::new("shared");
    let a = fx.module("alpha");
    let b = fx.module("beta");

    let env = fx.base_env();
    let mut graph = BuildGraph::new();
    pipeline::register_module(&mut graph, &env, &a, ToolchainMode::Native).unwrap();
    pipeline::register_module(&mut graph, &env, &b, ToolchainMode::Native).unwrap();

    // Both modules hang off the same script and archive.
    let script = fx.root.join("modules/link.ld");
    let archive = fx.root.join("build/modules/libmodule.a");
    for spec in [&a, &b] {
        assert!(graph.contains_edge(&spec.final_target, &script));
        assert!(graph.contains_edge(&spec.final_target, &archive));
    }

    let mut cache = CacheManifest::new();
    let summary = run(&graph, &mut cache).unwrap();
    assert_eq!(summary.executed, 4);
    assert!(a.final_target.exists());
    assert!(b.final_target.exists());
}

#[test]
fn static_drivers_define_switches_the_script() {
    let fx = Fixture::new("static");
    let spec = fx.module("ahci");

    let mut env = fx.base_env();
    env.add_define("STATIC_DRIVERS");

    let mut graph = BuildGraph::new();
    pipeline::register_module(&mut graph, &env, &spec, ToolchainMode::Native).unwrap();

    let mut cache = CacheManifest::new();
    run(&graph, &mut cache).unwrap();

    let content = fs::read_to_string(&spec.final_target).unwrap();
    assert!(content.contains("link_static.ld"));
}
