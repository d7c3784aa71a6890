//! Parallel executor for the registered build graph.
//!
//! Turns the registered actions into a DAG (a strip waits for its
//! module's link; everything else runs concurrently), checks each
//! action against the link cache, and dispatches stale actions to a
//! pool of worker threads. Tool invocations happen on workers; all
//! cache reads and writes stay on the main thread.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, mpsc};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};

use crate::cache::{self, CacheManifest, FreshResult};
use crate::error::BuildError;
use crate::graph::{Action, ActionKind, BuildGraph};
use crate::verbose::{dprintln, vprintln};

/// Knobs for one executor run.
#[derive(Default)]
pub struct ExecuteOptions {
    /// Worker thread count (0 = auto-detect from CPU count).
    pub jobs: usize,
    /// Ignore the link cache and rebuild everything.
    pub force: bool,
}

/// What one executor run did.
#[derive(Debug)]
pub struct ExecuteSummary {
    pub executed: usize,
    pub skipped: usize,
    pub elapsed: Duration,
}

/// A dispatched action, paired with its node index so the result can be
/// matched back to the DAG.
struct Job {
    node_idx: usize,
    action: Action,
}

enum Outcome {
    Done { node_idx: usize },
    Failed { error: BuildError },
}

/// Run every registered action, respecting dependency order and the
/// link cache. The first failure stops dispatch, drains in-flight work,
/// and is returned; already-finished artifacts stay cached.
pub fn execute(
    graph: &BuildGraph,
    cache: &mut CacheManifest,
    opts: &ExecuteOptions,
) -> Result<ExecuteSummary> {
    let actions = graph.actions();
    let total = actions.len();
    if total == 0 {
        return Ok(ExecuteSummary {
            executed: 0,
            skipped: 0,
            elapsed: Duration::ZERO,
        });
    }

    // Per-action input list: direct sources plus registered
    // prerequisites. Used both for freshness checks and for DAG edges
    // (an input with a producer action becomes an edge).
    let mut inputs_of: Vec<Vec<PathBuf>> = Vec::with_capacity(total);
    for action in actions {
        let mut inputs: Vec<PathBuf> = action.sources.clone();
        for prereq in graph.prerequisites_of(&action.target) {
            let prereq = prereq.to_path_buf();
            if !inputs.contains(&prereq) {
                inputs.push(prereq);
            }
        }
        inputs_of.push(inputs);
    }

    let mut in_degree: Vec<usize> = vec![0; total];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); total];
    for (idx, inputs) in inputs_of.iter().enumerate() {
        let mut seen: HashSet<usize> = HashSet::new();
        for input in inputs {
            if let Some(producer) = graph.producer(input) {
                let p = producer.0;
                if p != idx && seen.insert(p) {
                    in_degree[idx] += 1;
                    dependents[p].push(idx);
                }
            }
        }
    }

    let mut ready_queue: Vec<usize> = (0..total).filter(|&i| in_degree[i] == 0).collect();

    let num_workers = match opts.jobs {
        0 => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4),
        n => n,
    }
    .min(total);

    vprintln!(
        "  action DAG: {} actions, {} workers",
        total,
        num_workers
    );

    let (job_tx, job_rx) = mpsc::channel::<Job>();
    let (result_tx, result_rx) = mpsc::channel::<Outcome>();
    let job_rx = Mutex::new(job_rx);
    let job_rx_ref = &job_rx;

    let start = Instant::now();
    let mut executed = 0usize;
    let mut skipped = 0usize;
    // Artifacts rebuilt during this run; anything downstream of them is
    // stale regardless of what the manifest says.
    let mut rebuilt: HashSet<PathBuf> = HashSet::new();

    let run_result: Result<()> = std::thread::scope(|s| {
        for _ in 0..num_workers {
            let tx = result_tx.clone();
            s.spawn(move || {
                loop {
                    let job = match job_rx_ref.lock().unwrap().recv() {
                        Ok(j) => j,
                        Err(_) => break,
                    };
                    let outcome = match run_action(&job.action) {
                        Ok(()) => Outcome::Done {
                            node_idx: job.node_idx,
                        },
                        Err(error) => Outcome::Failed { error },
                    };
                    if tx.send(outcome).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut completed = 0usize;
        let mut in_flight = 0usize;

        while completed < total {
            let batch: Vec<usize> = ready_queue.drain(..).collect();
            for idx in batch {
                let action = &actions[idx];
                let flags_hash =
                    cache::hash_command(action.command.program(), action.command.args());

                let downstream_of_rebuilt =
                    inputs_of[idx].iter().any(|input| rebuilt.contains(input));

                if !opts.force && !downstream_of_rebuilt {
                    match cache.is_fresh(&action.target, &flags_hash, &inputs_of[idx]) {
                        FreshResult::Fresh => {
                            vprintln!("  Skipping {} (unchanged)", action.target.display());
                            skipped += 1;
                            completed += 1;
                            for &dep_idx in &dependents[idx] {
                                in_degree[dep_idx] -= 1;
                                if in_degree[dep_idx] == 0 {
                                    ready_queue.push(dep_idx);
                                }
                            }
                            continue;
                        }
                        FreshResult::Stale(reason) => {
                            vprintln!(
                                "  stale: {} — {}",
                                action.target.display(),
                                reason
                            );
                        }
                    }
                }

                let verb = match action.kind {
                    ActionKind::Link => "Linking",
                    ActionKind::Strip => "Stripping",
                };
                dprintln!("  {verb} {}...", action.target.display());

                let _ = job_tx.send(Job {
                    node_idx: idx,
                    action: action.clone(),
                });
                in_flight += 1;
            }

            if in_flight == 0 {
                if completed >= total {
                    break;
                }
                if ready_queue.is_empty() {
                    bail!(
                        "dependency cycle detected: {} of {} actions cannot be scheduled",
                        total - completed,
                        total,
                    );
                }
                continue;
            }

            match result_rx.recv() {
                Ok(Outcome::Done { node_idx }) => {
                    in_flight -= 1;
                    completed += 1;
                    executed += 1;

                    let action = &actions[node_idx];
                    let flags_hash =
                        cache::hash_command(action.command.program(), action.command.args());
                    cache.record(&action.target, flags_hash, &inputs_of[node_idx]);
                    rebuilt.insert(action.target.clone());

                    for &dep_idx in &dependents[node_idx] {
                        in_degree[dep_idx] -= 1;
                        if in_degree[dep_idx] == 0 {
                            ready_queue.push(dep_idx);
                        }
                    }
                }
                Ok(Outcome::Failed { error, .. }) => {
                    in_flight -= 1;
                    // Stop dispatching, let in-flight actions finish,
                    // then surface the first failure.
                    drop(job_tx);
                    while in_flight > 0 {
                        match result_rx.recv() {
                            Ok(Outcome::Done { node_idx }) => {
                                in_flight -= 1;
                                let action = &actions[node_idx];
                                let flags_hash = cache::hash_command(
                                    action.command.program(),
                                    action.command.args(),
                                );
                                cache.record(&action.target, flags_hash, &inputs_of[node_idx]);
                            }
                            Ok(Outcome::Failed { .. }) => in_flight -= 1,
                            Err(_) => break,
                        }
                    }
                    return Err(error.into());
                }
                Err(_) => {
                    bail!("worker threads terminated unexpectedly");
                }
            }
        }

        drop(job_tx);
        Ok(())
    });

    run_result?;

    Ok(ExecuteSummary {
        executed,
        skipped,
        elapsed: start.elapsed(),
    })
}

/// Run one action on a worker thread. A failed strip deletes whatever
/// it wrote so a truncated binary never sits at the deployable path.
fn run_action(action: &Action) -> Result<(), BuildError> {
    if let Some(parent) = action.target.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            return Err(tool_failure(action, format!("cannot create '{}': {e}", parent.display())));
        }
    }

    let output = match action.command.run() {
        Ok(output) => output,
        Err(e) => return Err(tool_failure(action, format!("{e:#}"))),
    };

    if output.status.success() {
        return Ok(());
    }

    let mut diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();
    if diagnostics.trim().is_empty() {
        diagnostics = format!(
            "'{}' exited with {}",
            action.command.display_line(),
            output.status
        );
    }

    if action.kind == ActionKind::Strip {
        let _ = fs::remove_file(&action.target);
    }

    Err(tool_failure(action, diagnostics))
}

fn tool_failure(action: &Action, diagnostics: String) -> BuildError {
    match action.kind {
        ActionKind::Link => BuildError::Link {
            module: action.module.clone(),
            diagnostics,
        },
        ActionKind::Strip => BuildError::Strip {
            module: action.module.clone(),
            diagnostics,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_cmd::ToolCommand;
    use std::path::Path;

    fn action(module: &str, kind: ActionKind, target: &str, sources: &[&str]) -> Action {
        let mut cmd = ToolCommand::new("true");
        cmd.out(Path::new(target));
        Action {
            module: module.into(),
            kind,
            target: PathBuf::from(target),
            sources: sources.iter().map(PathBuf::from).collect(),
            command: cmd,
        }
    }

    #[test]
    fn empty_graph_executes_nothing() {
        let graph = BuildGraph::new();
        let mut cache = CacheManifest::new();
        let summary = execute(&graph, &mut cache, &ExecuteOptions::default()).unwrap();
        assert_eq!(summary.executed, 0);
        assert_eq!(summary.skipped, 0);
    }

    #[test]
    fn mutually_dependent_actions_are_reported_as_a_cycle() {
        let mut graph = BuildGraph::new();
        graph
            .add_action(action("a", ActionKind::Link, "x.o", &["y.o"]))
            .unwrap();
        graph
            .add_action(action("b", ActionKind::Link, "y.o", &["x.o"]))
            .unwrap();

        let mut cache = CacheManifest::new();
        let err = execute(&graph, &mut cache, &ExecuteOptions::default()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("dependency cycle detected"), "got: {msg}");
        assert!(msg.contains("2 of 2"), "got: {msg}");
    }

    #[test]
    fn strip_waits_for_its_link() {
        // DAG shape only: the strip's source is the link's target, so
        // the strip node must carry in-degree 1.
        let mut graph = BuildGraph::new();
        graph
            .add_action(action("m", ActionKind::Link, "/tmp/modlink-x/int.o", &["a.o"]))
            .unwrap();
        graph
            .add_action(action(
                "m",
                ActionKind::Strip,
                "/tmp/modlink-x/m.kmod",
                &["/tmp/modlink-x/int.o"],
            ))
            .unwrap();

        let strip_inputs = vec![PathBuf::from("/tmp/modlink-x/int.o")];
        let producer = graph.producer(&strip_inputs[0]);
        assert!(producer.is_some());
    }
}
