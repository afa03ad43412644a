//! Prometheus metrics endpoint.

use crate::metrics::RelayMetrics;
use crate::server::RelayServer;
use crate::storage::{IdentityRegistry, MailboxStore};
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Gauges reflect current state; counters are monotonic since startup.
pub async fn metrics_handler(Extension(relay): Extension<Arc<RelayServer>>) -> impl IntoResponse {
    let m = relay.metrics();

    let connections = relay.active_connections();

    let conns_total = RelayMetrics::get(&m.connections_total);
    let requests = RelayMetrics::get(&m.requests_total);
    let registrations = RelayMetrics::get(&m.registrations_total);
    let enqueued = RelayMetrics::get(&m.items_enqueued);
    let delivered = RelayMetrics::get(&m.items_delivered);
    let failures = RelayMetrics::get(&m.failures_total);
    let internal = RelayMetrics::get(&m.internal_errors_total);

    // Storage stats (best effort)
    let identities = relay.storage().count().await.unwrap_or(0);
    let pending = relay.storage().pending_total().await.unwrap_or(0);

    let body = format!(
        r#"# HELP postbox_relay_connections_active Number of active connections
# TYPE postbox_relay_connections_active gauge
postbox_relay_connections_active {connections}

# HELP postbox_relay_info Server information
# TYPE postbox_relay_info gauge
postbox_relay_info{{version="{version}"}} 1

# HELP postbox_relay_connections_total Total connections accepted
# TYPE postbox_relay_connections_total counter
postbox_relay_connections_total {conns_total}

# HELP postbox_relay_requests_total Total request frames dispatched
# TYPE postbox_relay_requests_total counter
postbox_relay_requests_total {requests}

# HELP postbox_relay_registrations_total Total successful registrations
# TYPE postbox_relay_registrations_total counter
postbox_relay_registrations_total {registrations}

# HELP postbox_relay_items_enqueued_total Total mailbox items queued
# TYPE postbox_relay_items_enqueued_total counter
postbox_relay_items_enqueued_total {enqueued}

# HELP postbox_relay_items_delivered_total Total mailbox items delivered
# TYPE postbox_relay_items_delivered_total counter
postbox_relay_items_delivered_total {delivered}

# HELP postbox_relay_failures_total Total failure responses
# TYPE postbox_relay_failures_total counter
postbox_relay_failures_total {failures}

# HELP postbox_relay_internal_errors_total Total internal errors
# TYPE postbox_relay_internal_errors_total counter
postbox_relay_internal_errors_total {internal}

# HELP postbox_relay_identities Number of registered identities
# TYPE postbox_relay_identities gauge
postbox_relay_identities {identities}

# HELP postbox_relay_mailbox_pending Number of items waiting in mailboxes
# TYPE postbox_relay_mailbox_pending gauge
postbox_relay_mailbox_pending {pending}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
