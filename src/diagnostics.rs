//! Reporting for finished build invocations.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use console::Style;
use petgraph::graph::NodeIndex;

use crate::executor::Build;
use crate::task::Handle;

const ANSI_GREEN: Style = Style::new().green();
const ANSI_DIM: Style = Style::new().dim();

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// What happened to a single task during execution.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// The action ran to completion.
    Executed(TaskExecution),
    /// The task completed without running anything: it was disabled, it was
    /// a gate, or the invocation was a dry run.
    Skipped,
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    pub(crate) outcomes: HashMap<NodeIndex, TaskOutcome>,
}

impl Diagnostics {
    pub fn outcome(&self, handle: Handle) -> Option<&TaskOutcome> {
        self.outcomes.get(&handle.index)
    }

    /// Number of tasks whose action actually ran.
    pub fn executed(&self) -> usize {
        self.outcomes
            .values()
            .filter(|outcome| matches!(outcome, TaskOutcome::Executed(_)))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .values()
            .filter(|outcome| matches!(outcome, TaskOutcome::Skipped))
            .count()
    }

    /// Renders a per-task report, executed tasks first in start order.
    pub fn summary<G>(&self, build: &Build<G>) -> String
    where
        G: Send + Sync + 'static,
    {
        use std::fmt::Write;

        let mut executed: Vec<(NodeIndex, &TaskExecution)> = self
            .outcomes
            .iter()
            .filter_map(|(&index, outcome)| match outcome {
                TaskOutcome::Executed(execution) => Some((index, execution)),
                TaskOutcome::Skipped => None,
            })
            .collect();
        executed.sort_by_key(|(_, execution)| execution.start);

        let mut skipped: Vec<NodeIndex> = self
            .outcomes
            .iter()
            .filter_map(|(&index, outcome)| match outcome {
                TaskOutcome::Skipped => Some(index),
                TaskOutcome::Executed(_) => None,
            })
            .collect();
        skipped.sort_by_key(|&index| build.graph[index].name.clone());

        let mut acc = String::new();

        for (index, execution) in &executed {
            writeln!(
                acc,
                "{:<40} {}",
                build.graph[*index].name,
                ANSI_GREEN.apply_to(format!("{:.2?}", execution.duration)),
            )
            .unwrap();
        }

        for index in &skipped {
            writeln!(
                acc,
                "{:<40} {}",
                build.graph[*index].name,
                ANSI_DIM.apply_to("skipped"),
            )
            .unwrap();
        }

        writeln!(
            acc,
            "{} executed, {} skipped",
            executed.len(),
            skipped.len()
        )
        .unwrap();

        acc
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::blueprint::Blueprint;

    #[test]
    fn summary_lists_every_outcome() {
        let mut blueprint = Blueprint::<()>::default();
        blueprint.task().name("compile").run(|_| Ok(()));
        blueprint
            .task()
            .name("sort-fields-api")
            .group("sort-fields")
            .run(|_| Ok(()));
        blueprint.task().name("assemble").run(|_| Ok(()));
        blueprint.gate("sort-fields", "sort-fields");

        let mut build = blueprint.finish().unwrap();
        let plan = build.plan(["compile", "assemble"]).unwrap();
        let diagnostics = build.execute(&plan, ()).unwrap();

        let summary = diagnostics.summary(&build);
        assert!(summary.contains("compile"));
        assert!(summary.contains("assemble"));
        assert!(summary.contains("2 executed, 0 skipped"));
    }
}
