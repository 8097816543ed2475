//! Prometheus metrics for builds and container runs

use lazy_static::lazy_static;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    /// Global metric registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Wall-clock duration of image builds, in seconds
    pub static ref BUILD_DURATION: Histogram = {
        let h = Histogram::with_opts(
            HistogramOpts::new("kiln_build_duration_seconds", "Image build duration")
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
        )
        .unwrap();
        REGISTRY.register(Box::new(h.clone())).unwrap();
        h
    };

    /// Builds by outcome ("ok" or the failing error kind)
    pub static ref BUILDS_TOTAL: IntCounterVec = {
        let c = IntCounterVec::new(
            Opts::new("kiln_builds_total", "Image builds by outcome"),
            &["outcome"],
        )
        .unwrap();
        REGISTRY.register(Box::new(c.clone())).unwrap();
        c
    };

    /// Containers started from committed images
    pub static ref CONTAINER_STARTS_TOTAL: IntCounter = {
        let c = IntCounter::new("kiln_container_starts_total", "Container starts").unwrap();
        REGISTRY.register(Box::new(c.clone())).unwrap();
        c
    };
}

/// Render the registry in the Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    encoder
        .encode_to_string(&REGISTRY.gather())
        .unwrap_or_default()
}
