/// Build the span that wraps one request attempt, carrying
/// `db.system`/`db.operation`/`db.name`, peer name/port, attempt index, and
/// opaque as structured fields.
pub fn attempt_span(
    operation: &str,
    bucket: Option<&str>,
    peer_name: &str,
    peer_port: u16,
    attempt: u32,
    opaque: Option<u32>,
) -> tracing::Span {
    tracing::info_span!(
        "attempt",
        "db.system" = "couchbase",
        "db.operation" = %operation,
        "db.name" = bucket.unwrap_or("_default"),
        "net.peer.name" = %peer_name,
        "net.peer.port" = peer_port,
        attempt,
        opaque,
    )
}
