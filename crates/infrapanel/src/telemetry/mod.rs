use std::str::FromStr;

use infrapanel_config::LoggingConfig;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

pub fn log_level(config: &LoggingConfig) -> Level {
    if config.debug || cfg!(debug_assertions) {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

/// Directives handed to `EnvFilter` when `RUST_LOG` is not set.
pub fn default_directives(config: &LoggingConfig) -> String {
    let level = log_level(config).as_str().to_lowercase();
    let mut directives = format!(
        "infrapanel={level},infrapanel_server_manager={level},infrapanel_config={level},tower_http=info"
    );
    if let Some(extra) = config.filter.as_deref().map(str::trim)
        && !extra.is_empty()
    {
        directives.push(',');
        directives.push_str(extra);
    }
    directives
}

/// Level cap of the fmt layer. Explicit directives (`RUST_LOG` or
/// `logging.filter`) are left to the `EnvFilter` alone.
pub fn fmt_level_cap(config: &LoggingConfig, env_directives: bool) -> LevelFilter {
    let has_filter = config
        .filter
        .as_deref()
        .is_some_and(|f| !f.trim().is_empty());
    if env_directives || has_filter {
        LevelFilter::TRACE
    } else {
        LevelFilter::from_level(log_level(config))
    }
}

pub fn init_subscriber(config: &LoggingConfig) {
    let env_directives = std::env::var_os(EnvFilter::DEFAULT_ENV).is_some();
    let cap = fmt_level_cap(config, env_directives);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_level(true)
        .with_ansi(config.use_color)
        .with_target(config.show_target);

    let fmt_layer = if config.show_timestamp {
        fmt_layer.with_filter(cap).boxed()
    } else {
        fmt_layer.without_time().with_filter(cap).boxed()
    };

    let env_filter = if env_directives {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::from_str(&default_directives(config))
            .unwrap_or_else(|_| EnvFilter::from_default_env())
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extra_filter_is_appended() {
        let config = LoggingConfig {
            filter: Some("infrapanel_server_manager::console=trace".to_string()),
            ..LoggingConfig::default()
        };
        let directives = default_directives(&config);
        assert!(directives.ends_with(",infrapanel_server_manager::console=trace"));
        assert!(EnvFilter::from_str(&directives).is_ok());
    }

    #[test]
    fn test_explicit_directives_lift_the_level_cap() {
        let plain = LoggingConfig::default();
        assert_eq!(
            fmt_level_cap(&plain, false),
            LevelFilter::from_level(log_level(&plain))
        );
        assert_eq!(fmt_level_cap(&plain, true), LevelFilter::TRACE);

        let filtered = LoggingConfig {
            filter: Some("infrapanel_server_manager=trace".to_string()),
            ..LoggingConfig::default()
        };
        assert_eq!(fmt_level_cap(&filtered, false), LevelFilter::TRACE);

        let blank = LoggingConfig {
            filter: Some("  ".to_string()),
            ..LoggingConfig::default()
        };
        assert_eq!(
            fmt_level_cap(&blank, false),
            LevelFilter::from_level(log_level(&blank))
        );
    }

    #[test]
    fn test_debug_flag_forces_debug_level() {
        let config = LoggingConfig {
            debug: true,
            ..LoggingConfig::default()
        };
        assert_eq!(log_level(&config), Level::DEBUG);
        assert!(default_directives(&config).starts_with("infrapanel=debug"));
    }
}
