//! Phase one of a build invocation: constructing the task graph.
//!
//! A [`Blueprint`] collects tasks, gates, shared settings and deferred
//! configuration callbacks. All of it is evaluated eagerly at configuration
//! time, except the deferred callbacks, which run when the blueprint is
//! sealed with [`Blueprint::finish`], after every other piece of
//! configuration has had the chance to run.

use std::any::type_name;
use std::borrow::Cow;
use std::sync::Arc;

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::conventions::Conventions;
use crate::core::TaskContext;
use crate::error::KilnError;
use crate::executor::Build;
use crate::meta::ArchiveSettings;
use crate::scope::Scope;
use crate::task::{Group, Handle, Task, TaskKind};

/// Mutable settings area shared by the whole blueprint and visible to
/// deferred configuration callbacks.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub conventions: Conventions,
    pub archive: ArchiveSettings,
}

type DeferredFn = Box<dyn FnOnce(&mut Settings, &Scope) -> anyhow::Result<()> + Send>;

/// The blueprint for a build invocation.
///
/// `Blueprint` is used to define the task graph. You add tasks to the
/// blueprint and wire them together using their [`Handle`]s. Once
/// configured, you convert it into a [`Build`] to plan and execute.
///
/// # Example
///
/// ```rust,no_run
/// use kiln::{Blueprint, Scope};
///
/// let mut blueprint: Blueprint<()> = Blueprint::new(Scope::root().finish());
/// // Add tasks here...
/// ```
pub struct Blueprint<G: Send + Sync = ()> {
    pub(crate) graph: Graph<Task<G>, ()>,
    pub(crate) scope: Arc<Scope>,
    pub(crate) settings: Settings,
    defaults: Vec<Cow<'static, str>>,
    deferred: Vec<DeferredFn>,
}

impl<G: Send + Sync + 'static> Blueprint<G> {
    /// Creates an empty blueprint rooted in the given configuration scope.
    pub fn new(scope: Arc<Scope>) -> Self {
        Self {
            graph: Graph::new(),
            scope,
            settings: Settings::default(),
            defaults: Vec::new(),
            deferred: Vec::new(),
        }
    }

    /// Names of the tasks a build invocation falls back to when it requests
    /// nothing explicitly.
    pub fn default_tasks(
        &mut self,
        names: impl IntoIterator<Item = impl Into<Cow<'static, str>>>,
    ) {
        self.defaults = names.into_iter().map(Into::into).collect();
    }

    /// The configuration scope tasks inherit unless they attach their own.
    pub fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    /// Mutable access to the shared settings during configuration.
    pub fn settings(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// The entry point for defining a task.
    pub fn task(&mut self) -> TaskDef<'_, G> {
        TaskDef {
            blueprint: self,
            name: None,
            group: None,
            scope: None,
            dependencies: Vec::new(),
        }
    }

    /// Registers a gate task for the given family tag.
    ///
    /// The gate carries no action. Whether the tasks tagged with `family`
    /// run is decided at plan time from the gate's presence in the resolved
    /// execution set.
    pub fn gate(&mut self, name: impl Into<Cow<'static, str>>, family: impl Into<Group>) -> Handle {
        let task = Task {
            name: name.into(),
            group: None,
            scope: self.scope.clone(),
            kind: TaskKind::Gate(family.into()),
            enabled: true,
        };

        Handle::new(self.graph.add_node(task))
    }

    /// Declares an additional dependency between two existing tasks:
    /// `dependency` must complete before `dependent` starts.
    pub fn wire(&mut self, dependency: Handle, dependent: Handle) {
        self.graph.add_edge(dependency.index, dependent.index, ());
    }

    /// Registers a callback deferred until all configuration has run.
    ///
    /// Callbacks see the settings as every eager block left them; they run
    /// in registration order when [`Blueprint::finish`] is called, followed
    /// by the built-in archive policy normalization.
    pub fn after_configure(
        &mut self,
        callback: impl FnOnce(&mut Settings, &Scope) -> anyhow::Result<()> + Send + 'static,
    ) {
        self.deferred.push(Box::new(callback));
    }

    /// Ends the configuration phase and produces a [`Build`].
    pub fn finish(mut self) -> Result<Build<G>, KilnError> {
        for callback in self.deferred.drain(..) {
            callback(&mut self.settings, &self.scope).map_err(KilnError::Configure)?;
        }

        self.settings.archive.normalize();

        Ok(Build::new(
            self.graph,
            self.scope,
            self.settings,
            self.defaults,
        ))
    }

    pub(crate) fn add_task(&mut self, task: Task<G>, dependencies: Vec<NodeIndex>) -> Handle {
        let index = self.graph.add_node(task);

        for dependency in dependencies {
            self.graph.add_edge(dependency, index, ());
        }

        Handle::new(index)
    }
}

impl<G: Send + Sync + 'static> Default for Blueprint<G> {
    fn default() -> Self {
        Self::new(Scope::root().finish())
    }
}

impl<G> std::fmt::Display for Blueprint<G>
where
    G: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let task = &self.graph[index];
            let name = task.name.replace('"', "\\\""); // Simple escape

            if let Some(family) = task.gate_family() {
                writeln!(f, "    {:?}{{{{\"{} (gate: {})\"}}}}", index.index(), name, family)?;
            } else if let Some(group) = &task.group {
                writeln!(f, "    {:?}[\"{} ({})\"]", index.index(), name, group)?;
            } else {
                writeln!(f, "    {:?}[\"{}\"]", index.index(), name)?;
            }
        }

        for edge in self.graph.edge_indices() {
            let (source, target) = self.graph.edge_endpoints(edge).unwrap();
            writeln!(f, "    {:?} --> {:?}", source.index(), target.index())?;
        }

        Ok(())
    }
}

/// Fluent builder for a single task, obtained from [`Blueprint::task`].
pub struct TaskDef<'a, G: Send + Sync> {
    blueprint: &'a mut Blueprint<G>,
    name: Option<Cow<'static, str>>,
    group: Option<Group>,
    scope: Option<Arc<Scope>>,
    dependencies: Vec<NodeIndex>,
}

impl<'a, G: Send + Sync + 'static> TaskDef<'a, G> {
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Tags the task with a family group for gated activation.
    pub fn group(mut self, group: impl Into<Group>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Attaches a configuration scope overriding the blueprint default.
    pub fn scope(mut self, scope: Arc<Scope>) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn depends_on(mut self, dependency: Handle) -> Self {
        self.dependencies.push(dependency.index);
        self
    }

    pub fn depends_on_all(mut self, dependencies: impl IntoIterator<Item = Handle>) -> Self {
        self.dependencies
            .extend(dependencies.into_iter().map(|handle| handle.index));
        self
    }

    pub fn run<F>(self, callback: F) -> Handle
    where
        F: Fn(&TaskContext<'_, G>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let task = Task {
            name: self.name.unwrap_or(type_name::<F>().into()),
            group: self.group,
            scope: self.scope.unwrap_or_else(|| self.blueprint.scope.clone()),
            kind: TaskKind::Work(Arc::new(callback)),
            enabled: true,
        };

        self.blueprint.add_task(task, self.dependencies)
    }
}
