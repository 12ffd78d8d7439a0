use std::any::Any;
use std::sync::Arc;

/// A type-erased, thread-safe container.
pub(crate) type Dynamic = Arc<dyn Any + Send + Sync>;

/// Atomic reference-counted string type used for identifiers.
pub(crate) type ArcStr = std::sync::Arc<str>;

/// The mode in which a build invocation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Execute every task selected by the plan.
    Build,
    /// Resolve and finalize the plan, but skip every action.
    DryRun,
}

/// Global configuration and state available to all tasks.
///
/// This struct allows you to share global data (like configuration options or
/// shared state) across your entire task graph.
///
/// # Type Parameters
///
/// * `G`: The type of the user-defined global data. Must be `Send + Sync`.
#[derive(Clone)]
pub struct Environment<G: Send + Sync = ()> {
    /// The name of the orchestrator (defaults to "kiln").
    pub orchestrator: &'static str,
    /// The current invocation mode (Build or DryRun).
    pub mode: Mode,
    /// User-defined global data.
    pub data: G,
}

impl<G: Send + Sync> std::fmt::Debug for Environment<G>
where
    G: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("orchestrator", &self.orchestrator)
            .field("mode", &self.mode)
            .field("data", &self.data)
            .finish()
    }
}

impl<G: Send + Sync> Environment<G> {
    pub fn new(mode: Mode, data: G) -> Self {
        Self {
            orchestrator: "kiln",
            mode,
            data,
        }
    }
}

/// The context passed to every task action.
///
/// `TaskContext` provides access to the global environment and the
/// configuration scope the task was declared with. It is immutable during
/// task execution.
pub struct TaskContext<'a, G: Send + Sync = ()> {
    /// Access to global configuration and data.
    pub env: &'a Environment<G>,
    /// The configuration scope attached to this task.
    pub scope: &'a crate::Scope,
    /// Tracing span assigned to this task.
    pub(crate) span: tracing::Span,
}

impl<'a, G: Send + Sync> TaskContext<'a, G> {
    /// Tracing span assigned to this task, usable for progress reporting.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}
