//! Prometheus metrics for the crawl engine.

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntGauge, Registry};

macro_rules! metrics {
    ($($name:ident : $type:ty = $make:expr);* $(;)?) => {
        $(
          pub static $name: Lazy<$type> = Lazy::new(|| $make.unwrap());
        )*

        pub fn register_metrics(registry: &Registry) -> anyhow::Result<()> {
          $(registry.register(Box::new($name.clone()))?;)*
          Ok(())
        }
    };
}

metrics! {
    GOSSIP_RECEIVED: IntCounter =
        IntCounter::new("gossip_received", "Number of gossip messages received");

    GOSSIP_DEDUPED: IntCounter =
        IntCounter::new("gossip_deduped", "Number of gossip messages dropped as duplicates");

    GOSSIP_DECODE_FAILED: IntCounter =
        IntCounter::new("gossip_decode_failed", "Number of gossip messages that failed to decode");

    GOSSIP_VALIDATION_FAILED: IntCounter = IntCounter::new(
        "gossip_validation_failed",
        "Number of gossip messages that failed signature or expiry validation"
    );

    CRAWL_SUCCESS: IntCounter =
        IntCounter::new("crawl_success", "Number of crawls that completed with a new record");

    CRAWL_UNCHANGED: IntCounter = IntCounter::new(
        "crawl_unchanged",
        "Number of crawls whose record payload had not changed"
    );

    CRAWL_FAILED: IntCounter =
        IntCounter::new("crawl_failed", "Number of crawls abandoned after a transient error");

    PIN_ADD_TOTAL: IntCounter =
        IntCounter::new("pin_add_total", "Number of recursive pin-add calls issued");

    PIN_REMOVE_TOTAL: IntCounter =
        IntCounter::new("pin_remove_total", "Number of pin-remove calls issued");

    PIN_REMOVE_FAILURE: IntCounter =
        IntCounter::new("pin_remove_failure", "Number of failed pin-remove calls");

    JOB_QUEUE_DEPTH: IntGauge =
        IntGauge::new("job_queue_depth", "Number of workers currently busy on a job");
}
