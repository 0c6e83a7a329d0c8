use std::sync::OnceLock;

use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Variables consulted for filter directives, first match wins.
const FILTER_VARS: [&str; 2] = ["CLOUDDRIVE_LOG", "RUST_LOG"];
const DEFAULT_DIRECTIVES: &str = "info";

fn env_filter(lookup: impl Fn(&str) -> Option<String>) -> EnvFilter {
    FILTER_VARS
        .iter()
        .find_map(|var| lookup(var))
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Installs the global subscriber once, writing to stderr; later calls are
/// no-ops.
pub fn init_logging(json: bool) {
    TRACING_INIT.get_or_init(|| {
        let json_layer = json.then(|| {
            fmt::layer()
                .json()
                .with_timer(UtcTime::rfc_3339())
                .with_writer(std::io::stderr)
        });
        let text_layer = (!json).then(|| {
            fmt::layer()
                .with_timer(UtcTime::rfc_3339())
                .with_writer(std::io::stderr)
        });

        let _ = tracing_subscriber::registry()
            .with(env_filter(|var| std::env::var(var).ok()))
            .with(json_layer)
            .with(text_layer)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn filter_with(vars: &[(&str, &str)]) -> String {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        env_filter(|var| vars.get(var).cloned()).to_string()
    }

    #[test]
    fn app_variable_wins_over_rust_log() {
        assert_eq!(
            filter_with(&[("CLOUDDRIVE_LOG", "debug"), ("RUST_LOG", "warn")]),
            "debug"
        );
        assert_eq!(filter_with(&[("RUST_LOG", "warn")]), "warn");
    }

    #[test]
    fn falls_back_to_info() {
        assert_eq!(filter_with(&[]), "info");
    }
}
