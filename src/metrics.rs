//! Orchestrator metrics and tracing helpers.
//!
//! Both halves are feature-gated: `metrics` pulls in the OpenTelemetry stack,
//! `tracing` adds spans. With neither enabled this module is empty.

#[cfg(feature = "metrics")]
pub use self::otel::{install_prometheus_exporter, DriftguardMetrics, METRICS};

#[cfg(feature = "metrics")]
mod otel {
    use once_cell::sync::Lazy;
    use opentelemetry::{
        global,
        metrics::{Counter, Histogram},
        KeyValue,
    };
    use std::time::Duration;

    /// Instruments are bound to whatever meter provider is global on first use,
    /// so install the exporter before the first orchestration run.
    pub static METRICS: Lazy<DriftguardMetrics> = Lazy::new(DriftguardMetrics::init);

    pub struct DriftguardMetrics {
        pub migrations_applied: Counter<u64>,
        pub migrations_skipped: Counter<u64>,
        pub migrations_failed: Counter<u64>,
        pub lock_contention: Counter<u64>,
        pub store_errors: Counter<u64>,
        pub migration_duration: Histogram<f64>,
    }

    impl DriftguardMetrics {
        pub fn init() -> Self {
            let meter = global::meter("driftguard");

            Self {
                migrations_applied: meter
                    .u64_counter("driftguard_migrations_applied_total")
                    .with_description("Migrations executed and recorded as applied")
                    .build(),
                migrations_skipped: meter
                    .u64_counter("driftguard_migrations_skipped_total")
                    .with_description("Migrations fast-forwarded by the bootstrap pass")
                    .build(),
                migrations_failed: meter
                    .u64_counter("driftguard_migrations_failed_total")
                    .with_description("Migrations that returned an error, panicked or timed out")
                    .build(),
                lock_contention: meter
                    .u64_counter("driftguard_lock_contention_total")
                    .with_description("Runs aborted because another instance held the lock")
                    .build(),
                store_errors: meter
                    .u64_counter("driftguard_store_errors_total")
                    .with_description("Failed statements against the PostgreSQL backends")
                    .build(),
                migration_duration: meter
                    .f64_histogram("driftguard_migration_duration_seconds")
                    .with_description("Wall time of individual migration bodies")
                    .build(),
            }
        }

        pub fn record_applied(&self, namespace: &str, elapsed: Duration) {
            let attrs = [KeyValue::new("namespace", namespace.to_string())];
            self.migrations_applied.add(1, &attrs);
            self.migration_duration.record(elapsed.as_secs_f64(), &attrs);
        }

        pub fn record_skipped(&self, namespace: &str) {
            self.migrations_skipped
                .add(1, &[KeyValue::new("namespace", namespace.to_string())]);
        }

        pub fn record_failed(&self, namespace: &str, elapsed: Duration) {
            let attrs = [KeyValue::new("namespace", namespace.to_string())];
            self.migrations_failed.add(1, &attrs);
            self.migration_duration.record(elapsed.as_secs_f64(), &attrs);
        }

        pub fn record_contention(&self) {
            self.lock_contention.add(1, &[]);
        }

        pub fn record_store_error(&self) {
            self.store_errors.add(1, &[]);
        }
    }

    /// Installs a Prometheus-backed global meter provider and returns the
    /// registry to expose on a `/metrics` endpoint.
    ///
    /// # Errors
    ///
    /// Fails if the exporter cannot be registered with the registry.
    pub fn install_prometheus_exporter(
    ) -> Result<prometheus::Registry, Box<dyn std::error::Error + Send + Sync>> {
        let registry = prometheus::Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;
        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();
        global::set_meter_provider(provider);
        Ok(registry)
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    /// Span covering one orchestration run, from lock acquisition to release.
    pub fn run_span(lock_key: &str) -> Span {
        info_span!("driftguard.run", lock_key = %lock_key)
    }

    /// Span covering a single migration body.
    pub fn migration_span(namespace: &str, name: &str) -> Span {
        info_span!("driftguard.migration", namespace = %namespace, name = %name)
    }

    pub fn execute_query_span(query: &str) -> Span {
        // First line only; statements here are short but may be multi-line DDL.
        let head = query.trim().lines().next().unwrap_or_default();
        info_span!("driftguard.query", statement = %head)
    }

    pub fn connect_span(backend: &'static str) -> Span {
        info_span!("driftguard.connect", backend = backend)
    }
}
