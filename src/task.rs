//! Task nodes held by the build graph.

use std::borrow::Cow;
use std::fmt::Debug;
use std::sync::Arc;

use petgraph::graph::NodeIndex;

use crate::core::TaskContext;
use crate::scope::Scope;

/// Family tag attached to a task at construction time.
///
/// Gated activation tests membership by tag equality; task names play no
/// part in it, so naming collisions cannot pull a task into the wrong
/// family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Group(Arc<str>);

impl Group {
    pub fn new(tag: impl Into<Arc<str>>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Group {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for Group {
    fn from(tag: String) -> Self {
        Self::new(tag)
    }
}

impl std::fmt::Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Action function pointer executed when a work task runs. Provided by the
/// user from the userland, invoked internally during execution.
pub(crate) type ActionFnPtr<G> =
    Arc<dyn Fn(&TaskContext<G>) -> anyhow::Result<()> + Send + Sync>;

pub(crate) enum TaskKind<G: Send + Sync> {
    /// A unit of work with an executable action.
    Work(ActionFnPtr<G>),
    /// A task with no intrinsic action. Its presence in the requested
    /// execution set decides whether the named family runs.
    Gate(Group),
}

pub(crate) struct Task<G: Send + Sync> {
    pub(crate) name: Cow<'static, str>,
    pub(crate) group: Option<Group>,
    pub(crate) scope: Arc<Scope>,
    pub(crate) kind: TaskKind<G>,
    /// May be flipped during graph finalization; never during execution.
    pub(crate) enabled: bool,
}

impl<G: Send + Sync> Task<G> {
    pub(crate) fn is_gate(&self) -> bool {
        matches!(self.kind, TaskKind::Gate(_))
    }

    pub(crate) fn gate_family(&self) -> Option<&Group> {
        match &self.kind {
            TaskKind::Gate(family) => Some(family),
            TaskKind::Work(_) => None,
        }
    }

    pub(crate) fn in_family(&self, family: &Group) -> bool {
        self.group.as_ref() == Some(family)
    }
}

impl<G: Send + Sync> Debug for Task<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task({})", self.name)
    }
}

/// A lightweight, copyable token referencing a task in the build graph.
///
/// Handles are used to wire dependencies between tasks. When one task
/// depends on another, it holds a handle to that dependency; the build
/// system ensures the dependency completes before the dependent starts.
///
/// # Diamond dependencies
///
/// If task C and task B both depend on task A, and task D depends on both B
/// and C, task A will only be executed *once*.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    pub(crate) index: NodeIndex,
}

impl Handle {
    pub(crate) fn new(index: NodeIndex) -> Self {
        Self { index }
    }

    /// Returns the underlying `NodeIndex` of the task in the graph.
    pub fn index(&self) -> NodeIndex {
        self.index
    }
}
