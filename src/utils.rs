/// Short connection id (8 hex chars) taken from a random UUID, used to
/// correlate every log line and task belonging to one SSH connection.
pub fn generate_correlation_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    uuid.as_bytes()[..4]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Render `host:port`, bracketing IPv6 literals.
pub fn format_target(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
