//! Prometheus counters for the historian
//!
//! Registered once at first touch; scrape endpoints belong to the embedding
//! process, which can render the default registry via [`render`].

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, Counter, CounterVec, Encoder, TextEncoder,
};

lazy_static! {
    /// Raw event documents stored, by data model
    pub static ref EVENTS_STORED_TOTAL: CounterVec = register_counter_vec!(
        "tidemark_events_stored_total",
        "Raw event documents stored",
        &["data_model"]
    )
    .unwrap();

    /// Aggregation bucket updates, by resolution
    pub static ref BUCKET_UPDATES_TOTAL: CounterVec = register_counter_vec!(
        "tidemark_bucket_updates_total",
        "Aggregation bucket point updates",
        &["resolution"]
    )
    .unwrap();

    /// Hashed-name collisions observed by the collision registry
    pub static ref NAME_COLLISIONS_TOTAL: Counter = register_counter!(
        "tidemark_name_collisions_total",
        "Distinct logical keys hashing to an already registered identifier"
    )
    .unwrap();

    /// Retrieval calls served, by kind
    pub static ref RETRIEVALS_TOTAL: CounterVec = register_counter_vec!(
        "tidemark_retrievals_total",
        "Retrieval calls served",
        &["kind"]
    )
    .unwrap();
}

/// Render the default registry in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder
        .encode(&prometheus::gather(), &mut buffer)
        .is_err()
    {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_register_and_render() {
        EVENTS_STORED_TOTAL.with_label_values(&["per-entity"]).inc();
        NAME_COLLISIONS_TOTAL.inc();
        let text = render();
        assert!(text.contains("tidemark_events_stored_total"));
        assert!(text.contains("tidemark_name_collisions_total"));
    }
}
