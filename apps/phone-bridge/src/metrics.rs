use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static SNAPSHOTS_PUBLISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "bridge_snapshots_published_total",
            "snapshots handed to the transport by kind",
        ),
        &["kind"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static SNAPSHOTS_SUPPRESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "bridge_snapshots_suppressed_total",
            "snapshots skipped because they equal the last one sent, by kind",
        ),
        &["kind"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static PEER_SEND_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "bridge_peer_send_failures_total",
            "per-peer transport failures by path",
        ),
        &["path"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static COMMANDS_DENIED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "bridge_commands_denied_total",
            "inbound commands rejected by the permission gate, by path",
        ),
        &["path"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static BIND_FALLBACKS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::with_opts(Opts::new(
        "bridge_bind_fallbacks_total",
        "session bind failures recovered by rescanning",
    ))
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static SEARCH_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "bridge_search_outcomes_total",
            "play-from-search results by status",
        ),
        &["status"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub fn gather() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        eprintln!("metrics encode error: {err}");
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_renders_touched_counters() {
        SNAPSHOTS_PUBLISHED.with_label_values(&["player"]).inc();
        BIND_FALLBACKS.inc();
        let text = String::from_utf8(gather()).expect("utf8");
        assert!(text.contains("bridge_snapshots_published_total"));
        assert!(text.contains("bridge_bind_fallbacks_total"));
    }
}
