//! Phase two of a build invocation: planning and executing the task graph.
//!
//! Planning happens once, after the requested task set is known. It resolves
//! the execution set, then runs graph finalization: every gate absent from
//! the execution set disables its whole task family. Disabled tasks stay in
//! the graph and in the plan; execution skips them without removing them,
//! so their dependents are unaffected.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use petgraph::Direction;
use petgraph::graph::{Graph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::blueprint::Settings;
use crate::core::{Environment, Mode, TaskContext};
use crate::diagnostics::{Diagnostics, TaskExecution, TaskOutcome};
use crate::error::{BuildError, PlanError};
use crate::scope::Scope;
use crate::task::{Group, Handle, Task, TaskKind};

/// The resolved execution set for one build invocation.
#[derive(Debug, Clone)]
pub struct Plan {
    pub(crate) selected: HashSet<NodeIndex>,
    pub(crate) disabled: HashSet<NodeIndex>,
}

impl Plan {
    /// Number of tasks in the execution set, disabled ones included.
    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn is_selected(&self, handle: Handle) -> bool {
        self.selected.contains(&handle.index)
    }

    /// Number of tasks disabled by gate finalization, selected or not.
    pub fn disabled_count(&self) -> usize {
        self.disabled.len()
    }
}

/// A sealed task graph, ready to plan and execute.
///
/// Created from a [`Blueprint`](crate::Blueprint); the primary interface for
/// running build invocations.
pub struct Build<G: Send + Sync = ()> {
    pub(crate) graph: Graph<Task<G>, ()>,
    pub(crate) scope: Arc<Scope>,
    pub(crate) settings: Settings,
    defaults: Vec<Cow<'static, str>>,
}

impl<G: Send + Sync> std::fmt::Debug for Build<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Build")
            .field("nodes", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl<G> Build<G>
where
    G: Send + Sync + 'static,
{
    pub(crate) fn new(
        graph: Graph<Task<G>, ()>,
        scope: Arc<Scope>,
        settings: Settings,
        defaults: Vec<Cow<'static, str>>,
    ) -> Self {
        Self {
            graph,
            scope,
            settings,
            defaults,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    /// Name-based task lookup.
    pub fn lookup(&self, name: &str) -> Option<Handle> {
        self.graph
            .node_indices()
            .find(|&index| self.graph[index].name == name)
            .map(Handle::new)
    }

    /// Whether the task is currently enabled. Reflects the most recent
    /// [`Build::plan`] call; tasks start enabled.
    pub fn is_enabled(&self, handle: Handle) -> bool {
        self.graph[handle.index].enabled
    }

    /// Resolves the execution set for the requested tasks and finalizes the
    /// graph.
    ///
    /// Resolution proceeds in a fixed order: requested names are checked
    /// against the graph, requested gates are expanded to every task tagged
    /// with their family, and the transitive dependency closure is taken.
    /// Finalization then recomputes every enabled flag from a clean slate:
    /// each gate absent from the execution set disables its family. Because
    /// the outcome is a pure function of the requested set, replanning with
    /// the same request yields the same state.
    pub fn plan<'a>(
        &mut self,
        requested: impl IntoIterator<Item = &'a str>,
    ) -> Result<Plan, PlanError> {
        // Toposort is run primarily to detect cycles in the graph.
        if let Err(cycle) = petgraph::algo::toposort(&self.graph, None) {
            let name = self.graph[cycle.node_id()].name.to_string();
            return Err(PlanError::Cycle(name));
        }

        // An empty request falls back to the declared default tasks.
        let requested: Vec<&str> = requested.into_iter().collect();
        let names: Vec<&str> = if requested.is_empty() {
            self.defaults.iter().map(|name| name.as_ref()).collect()
        } else {
            requested
        };

        let mut roots = Vec::new();
        for name in names {
            let handle = self
                .lookup(name)
                .ok_or_else(|| PlanError::UnknownTask(name.to_string()))?;
            roots.push(handle.index);
        }

        // A requested gate pulls its whole family into the execution set.
        let mut seeds = roots.clone();
        for &index in &roots {
            if let TaskKind::Gate(family) = &self.graph[index].kind {
                seeds.extend(family_members(&self.graph, family));
            }
        }

        // Transitive dependency closure, walking incoming edges.
        let selected = {
            let reversed = Reversed(&self.graph);
            let mut selected = HashSet::new();

            for seed in seeds {
                let mut dfs = Dfs::new(reversed, seed);
                while let Some(node) = dfs.next(reversed) {
                    selected.insert(node);
                }
            }

            selected
        };

        // Graph finalization. Flags are reset first so that replanning never
        // carries state over from a previous request.
        for index in self.graph.node_indices() {
            self.graph[index].enabled = true;
        }

        let gates: Vec<(NodeIndex, Group)> = self
            .graph
            .node_indices()
            .filter_map(|index| {
                self.graph[index]
                    .gate_family()
                    .map(|family| (index, family.clone()))
            })
            .collect();

        let mut disabled = HashSet::new();
        for (gate, family) in gates {
            if selected.contains(&gate) {
                continue;
            }

            for member in family_members(&self.graph, &family) {
                self.graph[member].enabled = false;
                disabled.insert(member);
            }
        }

        Ok(Plan { selected, disabled })
    }

    /// Executes the plan with the default environment.
    pub fn execute(&self, plan: &Plan, data: G) -> Result<Diagnostics, BuildError> {
        let env = Environment::new(Mode::Build, data);
        self.execute_with(plan, &env)
    }

    /// Executes the plan under an explicit environment, e.g. a dry run.
    pub fn execute_with(
        &self,
        plan: &Plan,
        env: &Environment<G>,
    ) -> Result<Diagnostics, BuildError> {
        run_tasks_parallel(self, env, &plan.selected)
    }
}

fn family_members<G: Send + Sync>(graph: &Graph<Task<G>, ()>, family: &Group) -> Vec<NodeIndex> {
    graph
        .node_indices()
        .filter(|&index| graph[index].in_family(family))
        .collect()
}

/// This function executes the task graph using a thread pool. It performs a
/// parallel topological sort of the graph, where tasks are executed as soon
/// as their dependencies are met.
///
/// The algorithm works as follows:
/// 1. A channel is created for receiving results back from the workers.
/// 2. The initial set of tasks (those with no pending dependencies) is
///    spawned on the rayon pool.
/// 3. The main thread enters a loop, waiting for results from the workers.
/// 4. When a task completes, the dependency counts of all tasks that depend
///    on it are decremented; tasks reaching zero are spawned immediately.
/// 5. The loop continues until every selected task has completed.
fn run_tasks_parallel<G: Send + Sync>(
    build: &Build<G>,
    env: &Environment<G>,
    selected: &HashSet<NodeIndex>,
) -> Result<Diagnostics, BuildError> {
    let graph = &build.graph;

    // Build a map from a dependency to the nodes that depend on it.
    let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
    for edge in graph.raw_edges() {
        dependents
            .entry(edge.source())
            .or_default()
            .push(edge.target());
    }

    // Count dependencies for each node that we intend to run.
    // A dependency only counts if it's also in the set of nodes to run.
    let mut dependency_counts: HashMap<NodeIndex, usize> = selected
        .iter()
        .map(|&i| {
            (
                i,
                graph
                    .neighbors_directed(i, Direction::Incoming)
                    .filter(|dep| selected.contains(dep))
                    .count(),
            )
        })
        .collect();

    let total_tasks = selected.len() as u64;
    let mut completed_tasks = 0;

    if total_tasks == 0 {
        return Ok(Diagnostics::default());
    }

    let root_span = tracing::span!(Level::INFO, "running_tasks");
    root_span.pb_set_length(total_tasks);
    root_span.pb_set_style(&crate::utils::STYLE_MAIN);
    root_span.pb_set_message("Running tasks...");
    let _enter = root_span.enter();

    let mut outcomes = HashMap::new();

    rayon::scope(|s| -> Result<(), BuildError> {
        // (index, result, start, duration, ran_action)
        let (result_sender, result_receiver) =
            channel::<(NodeIndex, anyhow::Result<()>, Instant, Duration, bool)>();

        // A helper closure to spawn a task
        let spawn_task = |index: NodeIndex| {
            let task = &graph[index];

            // Disabled tasks and gates complete without running anything;
            // a dry run completes every task that way.
            let action = match &task.kind {
                TaskKind::Work(action) if task.enabled && env.mode == Mode::Build => {
                    Some(action.clone())
                }
                _ => None,
            };

            let Some(action) = action else {
                let _ = result_sender.send((index, Ok(()), Instant::now(), Duration::ZERO, false));
                return;
            };

            // Clone variables for the thread
            let sender = result_sender.clone();
            let name = task.name.clone();
            let scope = task.scope.clone();

            // Spawn on Rayon pool
            s.spawn(move |_| {
                let span = tracing::span!(Level::INFO, "task", name = %name);
                span.pb_set_style(&crate::utils::STYLE_TASK);
                span.pb_set_message(&format!("Running {name}"));
                let _enter = span.enter();

                let context = TaskContext {
                    env,
                    scope: &scope,
                    span: span.clone(),
                };

                let start_time = Instant::now();

                // We use AssertUnwindSafe because a panicking action only
                // ever sees cloned or immutable data, it cannot corrupt
                // state shared with other workers.
                let output = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    (action)(&context)
                })) {
                    Ok(result) => result,
                    Err(panic) => {
                        let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                            format!("Task panicked: {s}")
                        } else if let Some(s) = panic.downcast_ref::<String>() {
                            format!("Task panicked: {s}")
                        } else {
                            String::from("Task panicked with unknown payload")
                        };

                        Err(anyhow::anyhow!(msg))
                    }
                };

                let elapsed = start_time.elapsed();

                // Send result back to main thread
                let _ = sender.send((index, output, start_time, elapsed, true));
            });
        };

        // Seed initial tasks
        for &node_index in selected {
            if dependency_counts.get(&node_index).copied().unwrap_or(0) == 0 {
                spawn_task(node_index);
            }
        }

        // Scheduler loop
        // The main thread sits here while Rayon workers execute tasks.
        while completed_tasks < total_tasks {
            // Wait for any task to finish
            let (completed_index, output, start, duration, ran_action) =
                result_receiver.recv().unwrap();

            if let Err(error) = output {
                let name = graph[completed_index].name.to_string();
                return Err(BuildError::Task(name, error));
            }

            let outcome = if ran_action {
                TaskOutcome::Executed(TaskExecution { start, duration })
            } else {
                TaskOutcome::Skipped
            };

            outcomes.insert(completed_index, outcome);
            completed_tasks += 1;
            root_span.pb_inc(1);

            // Unlock dependents
            if let Some(dependents_of_completed) = dependents.get(&completed_index) {
                for &index in dependents_of_completed {
                    if let Some(count) = dependency_counts.get_mut(&index) {
                        *count -= 1;
                        if *count == 0 {
                            // Dependency satisfied, spawn immediately
                            spawn_task(index);
                        }
                    }
                }
            }
        }

        Ok(())
    })?;

    tracing::info!("Build finished");
    Ok(Diagnostics { outcomes })
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::blueprint::Blueprint;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&TaskContext<()>) -> anyhow::Result<()>) {
        let count = Arc::new(AtomicUsize::new(0));
        let spy = count.clone();
        (count, move |_: &TaskContext<()>| {
            spy.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn unknown_requested_task_is_rejected() {
        let mut build = Blueprint::<()>::default().finish().unwrap();

        let err = build.plan(["nonexistent"]).unwrap_err();
        assert!(matches!(err, PlanError::UnknownTask(name) if name == "nonexistent"));
    }

    #[test]
    fn cycles_are_detected_at_plan_time() {
        let mut blueprint = Blueprint::<()>::default();
        let a = blueprint.task().name("a").run(|_| Ok(()));
        let b = blueprint.task().name("b").depends_on(a).run(|_| Ok(()));
        blueprint.wire(b, a);

        let mut build = blueprint.finish().unwrap();
        assert!(matches!(build.plan(["a"]), Err(PlanError::Cycle(_))));
    }

    #[test]
    fn plan_takes_the_dependency_closure() {
        let (compiled, compile_action) = counter();
        let (tested, test_action) = counter();

        let mut blueprint = Blueprint::<()>::default();
        let compile = blueprint.task().name("compile").run(compile_action);
        let test = blueprint
            .task()
            .name("test")
            .depends_on(compile)
            .run(test_action);

        let mut build = blueprint.finish().unwrap();
        let plan = build.plan(["test"]).unwrap();

        assert!(plan.is_selected(compile));
        assert!(plan.is_selected(test));
        assert_eq!(plan.len(), 2);

        build.execute(&plan, ()).unwrap();
        assert_eq!(compiled.load(Ordering::SeqCst), 1);
        assert_eq!(tested.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn requested_gate_activates_the_family() {
        let (ran_a, action_a) = counter();
        let (ran_b, action_b) = counter();

        let mut blueprint = Blueprint::<()>::default();
        let a = blueprint
            .task()
            .name("sort-fields-api")
            .group("sort-fields")
            .run(action_a);
        let b = blueprint
            .task()
            .name("sort-fields-gen")
            .group("sort-fields")
            .run(action_b);
        blueprint.gate("sort-fields", "sort-fields");

        let mut build = blueprint.finish().unwrap();
        let plan = build.plan(["sort-fields"]).unwrap();

        assert!(build.is_enabled(a));
        assert!(build.is_enabled(b));
        assert_eq!(plan.disabled_count(), 0);

        let diagnostics = build.execute(&plan, ()).unwrap();
        assert_eq!(ran_a.load(Ordering::SeqCst), 1);
        assert_eq!(ran_b.load(Ordering::SeqCst), 1);
        assert_eq!(diagnostics.executed(), 2);
    }

    #[test]
    fn absent_gate_disables_the_family_anywhere_in_the_graph() {
        let (ran_member, member_action) = counter();
        let (ran_build, build_action) = counter();

        let mut blueprint = Blueprint::<()>::default();
        // The family member sits in the middle of the dependency chain.
        let member = blueprint
            .task()
            .name("sort-fields-api")
            .group("sort-fields")
            .run(member_action);
        let assemble = blueprint
            .task()
            .name("assemble")
            .depends_on(member)
            .run(build_action);
        blueprint.gate("sort-fields", "sort-fields");

        let mut build = blueprint.finish().unwrap();
        let plan = build.plan(["assemble"]).unwrap();

        // Disabled, still selected: skipped at execution, not removed.
        assert!(!build.is_enabled(member));
        assert!(plan.is_selected(member));
        assert_eq!(plan.disabled_count(), 1);

        let diagnostics = build.execute(&plan, ()).unwrap();
        assert_eq!(ran_member.load(Ordering::SeqCst), 0);
        assert_eq!(ran_build.load(Ordering::SeqCst), 1);
        assert!(matches!(
            diagnostics.outcome(member),
            Some(TaskOutcome::Skipped)
        ));
        assert!(matches!(
            diagnostics.outcome(assemble),
            Some(TaskOutcome::Executed(_))
        ));
    }

    #[test]
    fn finalization_is_idempotent() {
        let mut blueprint = Blueprint::<()>::default();
        let member = blueprint
            .task()
            .name("sort-fields-api")
            .group("sort-fields")
            .run(|_| Ok(()));
        let other = blueprint.task().name("assemble").run(|_| Ok(()));
        blueprint.gate("sort-fields", "sort-fields");

        let mut build = blueprint.finish().unwrap();

        let first = build.plan(["assemble"]).unwrap();
        let enabled_first = (build.is_enabled(member), build.is_enabled(other));

        let second = build.plan(["assemble"]).unwrap();
        let enabled_second = (build.is_enabled(member), build.is_enabled(other));

        assert_eq!(first.selected, second.selected);
        assert_eq!(first.disabled, second.disabled);
        assert_eq!(enabled_first, enabled_second);
    }

    #[test]
    fn replanning_with_the_gate_reactivates_the_family() {
        let mut blueprint = Blueprint::<()>::default();
        let member = blueprint
            .task()
            .name("sort-fields-api")
            .group("sort-fields")
            .run(|_| Ok(()));
        blueprint.task().name("assemble").run(|_| Ok(()));
        blueprint.gate("sort-fields", "sort-fields");

        let mut build = blueprint.finish().unwrap();

        build.plan(["assemble"]).unwrap();
        assert!(!build.is_enabled(member));

        build.plan(["sort-fields"]).unwrap();
        assert!(build.is_enabled(member));
    }

    #[test]
    fn dependencies_complete_before_dependents() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut blueprint = Blueprint::<()>::default();
        let first = order.clone();
        let a = blueprint.task().name("a").run(move |_| {
            first.lock().unwrap().push("a");
            Ok(())
        });
        let second = order.clone();
        blueprint.task().name("b").depends_on(a).run(move |_| {
            second.lock().unwrap().push("b");
            Ok(())
        });

        let mut build = blueprint.finish().unwrap();
        let plan = build.plan(["b"]).unwrap();
        build.execute(&plan, ()).unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn dry_run_skips_every_action() {
        let (ran, action) = counter();

        let mut blueprint = Blueprint::<()>::default();
        let task = blueprint.task().name("compile").run(action);

        let mut build = blueprint.finish().unwrap();
        let plan = build.plan(["compile"]).unwrap();

        let env = Environment::new(Mode::DryRun, ());
        let diagnostics = build.execute_with(&plan, &env).unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(matches!(
            diagnostics.outcome(task),
            Some(TaskOutcome::Skipped)
        ));
    }

    #[test]
    fn failing_tasks_abort_the_build_with_their_name() {
        let mut blueprint = Blueprint::<()>::default();
        blueprint
            .task()
            .name("explode")
            .run(|_| Err(anyhow::anyhow!("boom")));

        let mut build = blueprint.finish().unwrap();
        let plan = build.plan(["explode"]).unwrap();

        let err = build.execute(&plan, ()).unwrap_err();
        match err {
            BuildError::Task(name, error) => {
                assert_eq!(name, "explode");
                assert_eq!(error.to_string(), "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn panicking_tasks_are_reported_not_propagated() {
        let mut blueprint = Blueprint::<()>::default();
        blueprint.task().name("panic").run(|_| panic!("kaboom"));

        let mut build = blueprint.finish().unwrap();
        let plan = build.plan(["panic"]).unwrap();

        let err = build.execute(&plan, ()).unwrap_err();
        assert!(err.to_string().contains("kaboom"));
    }

    #[test]
    fn tasks_read_their_scope_through_the_context() {
        let root = Scope::root()
            .set("organization", "Example Org".to_string())
            .finish();
        let child = root.child().set("name", "widget-api".to_string()).finish();

        let seen = Arc::new(Mutex::new(String::new()));
        let spy = seen.clone();

        let mut blueprint = Blueprint::<()>::new(root);
        blueprint
            .task()
            .name("stamp")
            .scope(child)
            .run(move |ctx| {
                let organization = ctx.scope.get_str("organization")?;
                let name = ctx.scope.get_str("name")?;
                *spy.lock().unwrap() = format!("{organization}/{name}");
                Ok(())
            });

        let mut build = blueprint.finish().unwrap();
        let plan = build.plan(["stamp"]).unwrap();
        build.execute(&plan, ()).unwrap();

        assert_eq!(*seen.lock().unwrap(), "Example Org/widget-api");
    }

    #[test]
    fn empty_requests_fall_back_to_default_tasks() {
        let (ran, action) = counter();

        let mut blueprint = Blueprint::<()>::default();
        let compile = blueprint.task().name("compile").run(action);
        blueprint.task().name("publish").run(|_| Ok(()));
        blueprint.default_tasks(["compile"]);

        let mut build = blueprint.finish().unwrap();
        let plan = build.plan([]).unwrap();

        assert!(plan.is_selected(compile));
        assert_eq!(plan.len(), 1);

        build.execute(&plan, ()).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lookup_finds_tasks_by_name() {
        let mut blueprint = Blueprint::<()>::default();
        let compile = blueprint.task().name("compile").run(|_| Ok(()));

        let build = blueprint.finish().unwrap();
        assert_eq!(build.lookup("compile"), Some(compile));
        assert_eq!(build.lookup("missing"), None);
    }
}
