use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;

pub struct Metrics {
    request_counter: Counter<u64>,
    prediction_duration: Histogram<u64>,
    images_processed: Counter<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("tumor_classifier");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        let prediction_duration = meter
            .u64_histogram("prediction_duration_ms")
            .with_boundaries(duration_boundaries())
            .with_description("Duration of batch predictions in milliseconds")
            .build();

        let images_processed = meter
            .u64_counter("images_processed_total")
            .with_description("Images classified, by outcome")
            .build();

        Ok(Metrics {
            request_counter,
            prediction_duration,
            images_processed,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_prediction_duration(&self, duration_ms: u64, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.prediction_duration.record(duration_ms, &attributes);
    }

    pub fn record_images(&self, succeeded: u64, failed: u64) {
        if succeeded > 0 {
            self.images_processed
                .add(succeeded, &[KeyValue::new("outcome", "success")]);
        }
        if failed > 0 {
            self.images_processed
                .add(failed, &[KeyValue::new("outcome", "error")]);
        }
    }
}

// Fine buckets where single-image CPU inference lands, coarse ones for
// large batches.
fn duration_boundaries() -> Vec<f64> {
    let fine = (10..100).step_by(10);
    let medium = (100..1000).step_by(100);
    let coarse = (1000..=10000).step_by(1000);

    fine.chain(medium).chain(coarse).map(|x| x as f64).collect()
}
