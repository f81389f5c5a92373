//! Metric names and recording helpers.
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed (the server installs a Prometheus exporter).

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "murmur_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "murmur_connections_active";
    pub const AGENTS_REGISTERED: &str = "murmur_agents_registered_total";
    pub const AGENTS_ACTIVE: &str = "murmur_agents_active";
    pub const ROOMS_ACTIVE: &str = "murmur_rooms_active";
    pub const BROADCASTS_TOTAL: &str = "murmur_broadcasts_total";
    pub const DELIVERIES_TOTAL: &str = "murmur_deliveries_total";
    pub const EVICTIONS_TOTAL: &str = "murmur_evictions_total";
    pub const MESSAGES_TOTAL: &str = "murmur_messages_total";
    pub const MESSAGES_BYTES: &str = "murmur_messages_bytes";
    pub const ERRORS_TOTAL: &str = "murmur_errors_total";
}

/// Record an agent joining the registry.
pub fn record_registered(agents: usize, rooms: usize) {
    counter!(names::AGENTS_REGISTERED).increment(1);
    set_population(agents, rooms);
}

/// Update the agent and room gauges.
pub fn set_population(agents: usize, rooms: usize) {
    gauge!(names::AGENTS_ACTIVE).set(agents as f64);
    gauge!(names::ROOMS_ACTIVE).set(rooms as f64);
}

/// Record one processed broadcast and its fan-out.
pub fn record_broadcast(delivered: usize) {
    counter!(names::BROADCASTS_TOTAL).increment(1);
    counter!(names::DELIVERIES_TOTAL).increment(delivered as u64);
}

/// Record an eviction.
pub fn record_eviction(reason: &'static str) {
    counter!(names::EVICTIONS_TOTAL, "reason" => reason).increment(1);
}

/// Record a message crossing the wire.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a connection-level error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}
