//! Declarative build graph: link/strip action nodes plus dependency edges.
//!
//! Registration is pure bookkeeping — no I/O happens here. The
//! [`executor`](crate::executor) turns the registered nodes into a DAG
//! and runs them. Edge registration is additive and idempotent, so
//! concurrent module registrations against a shared prerequisite (the
//! support archive, say) need no coordination beyond the usual `&mut`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::tool_cmd::ToolCommand;

/// What kind of work an action performs; doubles as the stage tag on
/// failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActionKind {
    Link,
    Strip,
}

/// Handle to a registered action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionId(pub(crate) usize);

/// A single registered build action producing one artifact.
#[derive(Debug, Clone, Serialize)]
pub struct Action {
    /// Module this action belongs to, for failure attribution.
    pub module: String,
    pub kind: ActionKind,
    /// Artifact this action produces.
    pub target: PathBuf,
    /// Direct file inputs (objects for a link, the intermediate for a
    /// strip). Prerequisites registered via [`BuildGraph::depends`] are
    /// tracked separately.
    pub sources: Vec<PathBuf>,
    /// Fully assembled tool invocation.
    pub command: ToolCommand,
}

/// Graph-level registration failure.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("artifact cannot depend on itself")]
    SelfDependency,
    #[error("an action already produces '{0}'")]
    DuplicateTarget(PathBuf),
}

/// The declarative build graph a run registers into.
#[derive(Debug, Default)]
pub struct BuildGraph {
    actions: Vec<Action>,
    by_target: HashMap<PathBuf, usize>,
    edges: HashSet<(PathBuf, PathBuf)>,
}

impl BuildGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action. Each artifact may have exactly one producer.
    pub fn add_action(&mut self, action: Action) -> Result<ActionId, GraphError> {
        if self.by_target.contains_key(&action.target) {
            return Err(GraphError::DuplicateTarget(action.target.clone()));
        }
        let id = ActionId(self.actions.len());
        self.by_target.insert(action.target.clone(), id.0);
        self.actions.push(action);
        Ok(id)
    }

    /// Declare that `artifact` depends on `prerequisite`. Registering
    /// the same edge again has no effect beyond the first.
    pub fn depends(&mut self, artifact: &Path, prerequisite: &Path) -> Result<(), GraphError> {
        if artifact == prerequisite {
            return Err(GraphError::SelfDependency);
        }
        self.edges
            .insert((artifact.to_path_buf(), prerequisite.to_path_buf()));
        Ok(())
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn action(&self, id: ActionId) -> &Action {
        &self.actions[id.0]
    }

    /// The action producing `artifact`, if one is registered.
    pub fn producer(&self, artifact: &Path) -> Option<ActionId> {
        self.by_target.get(artifact).copied().map(ActionId)
    }

    /// Registered prerequisites of `artifact`, in deterministic order.
    pub fn prerequisites_of(&self, artifact: &Path) -> Vec<&Path> {
        let mut prereqs: Vec<&Path> = self
            .edges
            .iter()
            .filter(|(a, _)| a == artifact)
            .map(|(_, p)| p.as_path())
            .collect();
        prereqs.sort();
        prereqs
    }

    pub fn contains_edge(&self, artifact: &Path, prerequisite: &Path) -> bool {
        self.edges
            .contains(&(artifact.to_path_buf(), prerequisite.to_path_buf()))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// All edges, sorted for stable output (plan listings, tests).
    pub fn edges(&self) -> Vec<(&Path, &Path)> {
        let mut edges: Vec<(&Path, &Path)> = self
            .edges
            .iter()
            .map(|(a, p)| (a.as_path(), p.as_path()))
            .collect();
        edges.sort();
        edges
    }
}
