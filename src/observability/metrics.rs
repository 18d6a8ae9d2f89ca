use prometheus::{
    Encoder, Histogram, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dispatches_total: IntCounterVec,
    pub deliveries_in_queue: IntGauge,
    pub dispatch_latency_seconds: HistogramVec,
    pub offers_total: IntCounterVec,
    pub offer_response_seconds: Histogram,
    pub ws_connections_active: IntGauge,
    pub ws_messages_total: IntCounterVec,
    pub webhooks_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dispatches_total = IntCounterVec::new(
            Opts::new("dispatches_total", "Total dispatch attempts by outcome"),
            &["outcome"],
        )
        .expect("valid dispatches_total metric");

        let deliveries_in_queue =
            IntGauge::new("deliveries_in_queue", "Current number of deliveries queued")
                .expect("valid deliveries_in_queue metric");

        let dispatch_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "dispatch_latency_seconds",
                "Latency of dispatch processing in seconds",
            ),
            &["outcome"],
        )
        .expect("valid dispatch_latency_seconds metric");

        let offers_total = IntCounterVec::new(
            Opts::new("offers_total", "Total offers resolved by outcome"),
            &["outcome"],
        )
        .expect("valid offers_total metric");

        let offer_response_seconds = Histogram::with_opts(prometheus::HistogramOpts::new(
            "offer_response_seconds",
            "Time from offer creation to driver response in seconds",
        ))
        .expect("valid offer_response_seconds metric");

        let ws_connections_active = IntGauge::new(
            "ws_connections_active",
            "Currently connected driver channels",
        )
        .expect("valid ws_connections_active metric");

        let ws_messages_total = IntCounterVec::new(
            Opts::new("ws_messages_total", "Driver channel messages by direction"),
            &["direction"],
        )
        .expect("valid ws_messages_total metric");

        let webhooks_total = IntCounterVec::new(
            Opts::new("webhooks_total", "Commerce webhook deliveries by outcome"),
            &["outcome"],
        )
        .expect("valid webhooks_total metric");

        registry
            .register(Box::new(dispatches_total.clone()))
            .expect("register dispatches_total");
        registry
            .register(Box::new(deliveries_in_queue.clone()))
            .expect("register deliveries_in_queue");
        registry
            .register(Box::new(dispatch_latency_seconds.clone()))
            .expect("register dispatch_latency_seconds");
        registry
            .register(Box::new(offers_total.clone()))
            .expect("register offers_total");
        registry
            .register(Box::new(offer_response_seconds.clone()))
            .expect("register offer_response_seconds");
        registry
            .register(Box::new(ws_connections_active.clone()))
            .expect("register ws_connections_active");
        registry
            .register(Box::new(ws_messages_total.clone()))
            .expect("register ws_messages_total");
        registry
            .register(Box::new(webhooks_total.clone()))
            .expect("register webhooks_total");

        Self {
            registry,
            dispatches_total,
            deliveries_in_queue,
            dispatch_latency_seconds,
            offers_total,
            offer_response_seconds,
            ws_connections_active,
            ws_messages_total,
            webhooks_total,
        }
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
