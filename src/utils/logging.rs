use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize tracing/logging for the application.
///
/// `RUST_LOG` wins when set; otherwise `default_level` is used as the filter.
/// With `json` enabled every event is emitted as one JSON object per line.
pub fn init(default_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(normalize_level(default_level)));

    // Use try_init so tests and libraries can call this multiple times without panicking
    if json {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(false))
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init();
    }
}

fn normalize_level(level: &str) -> &'static str {
    match level.to_lowercase().as_str() {
        "error" => "error",
        "warn" | "warning" => "warn",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_init_accepts_levels() {
        // Should not panic
        init("info", false);
        init("debug", false);
        init("warn", true);
    }

    #[test]
    fn unknown_levels_fall_back_to_info() {
        assert_eq!(normalize_level("WARNING"), "warn");
        assert_eq!(normalize_level("Trace"), "trace");
        assert_eq!(normalize_level("verbose"), "info");
    }
}
