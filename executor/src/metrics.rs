//! Prometheus metrics for the task scheduler.

use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, IntCounter, IntGauge,
    Opts, Registry,
};

#[derive(Clone)]
pub struct SchedulerMetrics {
    // ── Gauges ──────────────────────────────────────────────────────────
    /// Entries in the schedule, in any state.
    pub scheduled_tasks: IntGauge,
    pub running_tasks: IntGauge,

    // ── Counters ────────────────────────────────────────────────────────
    pub tasks_started: IntCounter,
    pub tasks_succeeded: IntCounter,
    pub tasks_failed: IntCounter,
    /// Tasks killed by request, expiry or unresponsiveness.
    pub tasks_killed: IntCounter,
}

impl SchedulerMetrics {
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let scheduled_tasks = register_int_gauge_with_registry!(
            Opts::new("vigil_scheduler_scheduled_tasks", "Tasks in the schedule"),
            registry
        )?;

        let running_tasks = register_int_gauge_with_registry!(
            Opts::new("vigil_scheduler_running_tasks", "Tasks currently executing"),
            registry
        )?;

        let tasks_started = register_int_counter_with_registry!(
            Opts::new("vigil_scheduler_tasks_started_total", "Tasks handed to the executor"),
            registry
        )?;

        let tasks_succeeded = register_int_counter_with_registry!(
            Opts::new(
                "vigil_scheduler_tasks_succeeded_total",
                "Tasks that finished without error"
            ),
            registry
        )?;

        let tasks_failed = register_int_counter_with_registry!(
            Opts::new(
                "vigil_scheduler_tasks_failed_total",
                "Tasks that finished with an error"
            ),
            registry
        )?;

        let tasks_killed = register_int_counter_with_registry!(
            Opts::new("vigil_scheduler_tasks_killed_total", "Tasks killed"),
            registry
        )?;

        Ok(Self {
            scheduled_tasks,
            running_tasks,
            tasks_started,
            tasks_succeeded,
            tasks_failed,
            tasks_killed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_all_families() {
        let registry = Registry::new();
        let metrics = SchedulerMetrics::register(&registry).unwrap();
        metrics.tasks_started.inc();
        metrics.scheduled_tasks.set(3);
        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"vigil_scheduler_tasks_started_total".to_string()));
        assert!(names.contains(&"vigil_scheduler_scheduled_tasks".to_string()));
        assert_eq!(names.len(), 6);
    }

    #[test]
    fn double_registration_fails() {
        let registry = Registry::new();
        SchedulerMetrics::register(&registry).unwrap();
        assert!(SchedulerMetrics::register(&registry).is_err());
    }
}
