pub struct Metric {
    pub name: &'static str,
    pub description: &'static str,
}

pub const COUNTERS: [Metric; 9] = [
    PUSH_TASKS_ENQUEUED_TOTAL,
    PUSH_TASKS_MERGED_TOTAL,
    PUSH_TASKS_DISPATCHED_TOTAL,
    PUSH_SUCCESS_TOTAL,
    PUSH_FAILURES_TOTAL,
    PUSH_RETRIES_TOTAL,
    PUSH_TASKS_DROPPED_TOTAL,
    SYNC_BATCHES_SENT_TOTAL,
    SYNC_TASKS_COMPLETED_TOTAL,
];
pub const GAUGES: [Metric; 2] = [PUSH_PENDING_TASKS, FUZZY_WATCH_BINDINGS];

// ENGINE Metrics --------------------------

pub const PUSH_TASKS_ENQUEUED_TOTAL: Metric = Metric {
    name: "meridian_push_tasks_enqueued_total",
    description: "Total delay tasks inserted as new pending entries",
};

pub const PUSH_TASKS_MERGED_TOTAL: Metric = Metric {
    name: "meridian_push_tasks_merged_total",
    description: "Total delay tasks folded into an already pending entry",
};

pub const PUSH_TASKS_DISPATCHED_TOTAL: Metric = Metric {
    name: "meridian_push_tasks_dispatched_total",
    description: "Total delay tasks handed to the execution pool",
};

pub const PUSH_PENDING_TASKS: Metric = Metric {
    name: "meridian_push_pending_tasks",
    description: "Number of delay tasks waiting in the engine",
};

// DELIVERY Metrics --------------------------

pub const PUSH_SUCCESS_TOTAL: Metric = Metric {
    name: "meridian_push_success_total",
    description: "Total push requests acknowledged by clients",
};

pub const PUSH_FAILURES_TOTAL: Metric = Metric {
    name: "meridian_push_failures_total",
    description: "Total push requests that failed or timed out",
};

pub const PUSH_RETRIES_TOTAL: Metric = Metric {
    name: "meridian_push_retries_total",
    description: "Total delay tasks re-enqueued after a retryable failure",
};

pub const PUSH_TASKS_DROPPED_TOTAL: Metric = Metric {
    name: "meridian_push_tasks_dropped_total",
    description: "Total delay tasks discarded without delivery",
};

pub const SYNC_BATCHES_SENT_TOTAL: Metric = Metric {
    name: "meridian_sync_batches_sent_total",
    description: "Total fuzzy watch sync batches handed to the transport",
};

pub const SYNC_TASKS_COMPLETED_TOTAL: Metric = Metric {
    name: "meridian_sync_tasks_completed_total",
    description: "Total sync tasks whose every batch was acknowledged",
};

// WATCH Metrics --------------------------

pub const FUZZY_WATCH_BINDINGS: Metric = Metric {
    name: "meridian_fuzzy_watch_bindings",
    description: "Number of active (client, pattern) watch bindings",
};

/// Describe and register every push metric with the installed recorder.
pub fn register_metrics() {
    for metric in COUNTERS {
        metrics::describe_counter!(metric.name, metric.description);
        let _counter = metrics::counter!(metric.name);
    }
    for metric in GAUGES {
        metrics::describe_gauge!(metric.name, metric.description);
        let _gauge = metrics::gauge!(metric.name);
    }
}
