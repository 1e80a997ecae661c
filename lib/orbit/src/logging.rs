pub use slog::{crit, debug, error, info, o, trace, warn};
pub use slog::{Discard, Drain, Level, Logger};

use sloggers::{Config, LoggerConfig};

/// Builds the root terminal logger writing to stderr at the requested level.
///
/// The level must be one of `trace`, `debug`, `info`, `warning`, `error`
/// or `critical`.
pub fn init(level: &str) -> Logger {
    let config: LoggerConfig = serdeconv::from_toml_str(&format!(
        r#"
type = "terminal"
level = "{}"
destination = "stderr"
"#,
        level
    ))
    .expect("Error parsing logger configuration");

    config.build_logger().expect("Error building logger")
}

/// Root logger that swallows all records. Used by components constructed
/// without a parent logger and by tests.
#[inline]
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_levels() {
        for level in &["trace", "debug", "info", "warning", "error"] {
            let _ = init(level);
        }
    }

    #[test]
    #[should_panic(expected = "Error parsing logger configuration")]
    fn test_init_bad_level() {
        let _ = init("loud");
    }

    #[test]
    fn test_discard_accepts_records() {
        let log = discard();
        info!(log, "nothing to see"; "key" => 1);
    }
}
