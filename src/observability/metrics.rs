use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub vehicle_operations_total: IntCounterVec,
    pub operation_latency_seconds: HistogramVec,
    pub refreshes_total: IntCounterVec,
    pub operations_in_flight: IntGauge,
    pub sessions_active: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let vehicle_operations_total = IntCounterVec::new(
            Opts::new(
                "vehicle_operations_total",
                "Vehicle operations by kind and outcome",
            ),
            &["operation", "outcome"],
        )
        .expect("valid vehicle_operations_total metric");

        let operation_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "operation_latency_seconds",
                "Latency of vehicle operations in seconds, including the follow-up refresh",
            ),
            &["operation"],
        )
        .expect("valid operation_latency_seconds metric");

        let refreshes_total = IntCounterVec::new(
            Opts::new("refreshes_total", "Snapshot refreshes by trigger and outcome"),
            &["trigger", "outcome"],
        )
        .expect("valid refreshes_total metric");

        let operations_in_flight = IntGauge::new(
            "operations_in_flight",
            "Vehicle operations currently awaiting the backend",
        )
        .expect("valid operations_in_flight metric");

        let sessions_active = IntGauge::new("sessions_active", "Open dispatch sessions")
            .expect("valid sessions_active metric");

        registry
            .register(Box::new(vehicle_operations_total.clone()))
            .expect("register vehicle_operations_total");
        registry
            .register(Box::new(operation_latency_seconds.clone()))
            .expect("register operation_latency_seconds");
        registry
            .register(Box::new(refreshes_total.clone()))
            .expect("register refreshes_total");
        registry
            .register(Box::new(operations_in_flight.clone()))
            .expect("register operations_in_flight");
        registry
            .register(Box::new(sessions_active.clone()))
            .expect("register sessions_active");

        Self {
            registry,
            vehicle_operations_total,
            operation_latency_seconds,
            refreshes_total,
            operations_in_flight,
            sessions_active,
        }
    }

    pub fn record_operation(&self, operation: &str, outcome: &str, elapsed_secs: f64) {
        self.vehicle_operations_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.operation_latency_seconds
            .with_label_values(&[operation])
            .observe(elapsed_secs);
    }

    pub fn record_refresh(&self, trigger: &str, outcome: &str) {
        self.refreshes_total
            .with_label_values(&[trigger, outcome])
            .inc();
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
