//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Format the per-request access line
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level
//! - Access lines are plain `tracing` events on the `access` target

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. Safe to call once per process.
pub fn init(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("vhost_engine={level},access={level},tower_http={level}").into());

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if let Err(e) = result {
        eprintln!("logging already initialized: {e}");
    }
}

/// `(ip[country])`, or nothing when the address is unknown.
pub fn client_label(ip: &str, country: Option<&str>) -> String {
    if ip.is_empty() {
        return String::new();
    }
    match country {
        Some(c) if !c.is_empty() => format!("({}[{}])", ip, c),
        _ => format!("({})", ip),
    }
}

/// Log one admitted request as `[domain][METHOD] url (ip[country]) user-agent`.
pub fn access(domain: &str, method: &str, url: &str, ip: &str, country: Option<&str>, user_agent: &str) {
    tracing::info!(
        target: "access",
        "[{}][{}] {} {} {}",
        domain,
        method,
        url,
        client_label(ip, country),
        user_agent
    );
}

/// Log one blocked request. The User-Agent is cut to 48 characters.
pub fn blocked(domain: &str, method: &str, url: &str, ip: &str, country: Option<&str>, user_agent: &str) {
    let short: String = user_agent.chars().take(48).collect();
    tracing::info!(
        target: "access",
        "[{}][{}][BLOCKED] {} {} {}",
        domain,
        method,
        url,
        client_label(ip, country),
        short
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_label() {
        assert_eq!(client_label("1.2.3.4", Some("DE")), "(1.2.3.4[DE])");
        assert_eq!(client_label("1.2.3.4", None), "(1.2.3.4)");
        assert_eq!(client_label("", Some("DE")), "");
    }
}
