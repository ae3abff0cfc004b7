//! Prometheus text exposition of engine state.

use std::collections::HashMap;
use std::fmt::Write;

use jobrun_core::{ExecutionClass, TaskKind, TaskState};

use crate::scheduler::PoolSnapshot;

/// Point-in-time counts gathered by the engine under its locks.
#[derive(Debug, Default)]
pub(crate) struct MetricsSnapshot {
    pub tasks_by_state: HashMap<TaskState, u64>,
    pub tasks_by_kind: HashMap<TaskKind, u64>,
    pub pools: Vec<(ExecutionClass, PoolSnapshot, usize)>,
    pub results_stored: usize,
}

/// Format a snapshot as Prometheus text.
pub(crate) fn collect_metrics(snapshot: &MetricsSnapshot) -> String {
    let mut output = String::new();

    collect_task_metrics(snapshot, &mut output);
    collect_pool_metrics(snapshot, &mut output);
    collect_result_metrics(snapshot, &mut output);

    output
}

fn collect_task_metrics(snapshot: &MetricsSnapshot, output: &mut String) {
    writeln!(
        output,
        "# HELP jobrun_tasks_total Number of known tasks by state"
    )
    .ok();
    writeln!(output, "# TYPE jobrun_tasks_total gauge").ok();
    for state in TaskState::all() {
        let count = snapshot.tasks_by_state.get(state).copied().unwrap_or(0);
        writeln!(output, "jobrun_tasks_total{{state=\"{state}\"}} {count}").ok();
    }

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP jobrun_tasks_by_kind Number of known tasks by kind"
    )
    .ok();
    writeln!(output, "# TYPE jobrun_tasks_by_kind gauge").ok();
    for kind in TaskKind::all() {
        let count = snapshot.tasks_by_kind.get(kind).copied().unwrap_or(0);
        writeln!(output, "jobrun_tasks_by_kind{{kind=\"{kind}\"}} {count}").ok();
    }
}

fn collect_pool_metrics(snapshot: &MetricsSnapshot, output: &mut String) {
    let families = [
        ("jobrun_pool_running", "Tasks holding a worker slot"),
        ("jobrun_pool_queued", "Tasks waiting for a worker slot or working resource"),
        ("jobrun_pool_capacity", "Configured worker slots"),
    ];
    for (name, help) in families {
        writeln!(output).ok();
        writeln!(output, "# HELP {name} {help} by execution class").ok();
        writeln!(output, "# TYPE {name} gauge").ok();
        for (class, pool, capacity) in &snapshot.pools {
            let value = match name {
                "jobrun_pool_running" => pool.running,
                "jobrun_pool_queued" => pool.queued,
                _ => *capacity,
            };
            writeln!(output, "{name}{{class=\"{class}\"}} {value}").ok();
        }
    }
}

fn collect_result_metrics(snapshot: &MetricsSnapshot, output: &mut String) {
    writeln!(output).ok();
    writeln!(
        output,
        "# HELP jobrun_results_stored Number of fetchable results"
    )
    .ok();
    writeln!(output, "# TYPE jobrun_results_stored gauge").ok();
    writeln!(output, "jobrun_results_stored {}", snapshot.results_stored).ok();
}
