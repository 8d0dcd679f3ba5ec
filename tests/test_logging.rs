//! Tests for logging configuration and format parsing
//!
//! Tests the pure functions in the logging module that turn environment
//! values and `-v` flags into subscriber settings.

use mqtt_telemetry::observability::init_logging;
use mqtt_telemetry::observability::logging::{level_from_verbosity, parse_level, LogFormat};
use tracing::Level;

#[test]
fn test_log_format_parse_json() {
    assert!(matches!(LogFormat::parse("json"), LogFormat::Json));
    assert!(matches!(LogFormat::parse("JSON"), LogFormat::Json));
    assert!(matches!(LogFormat::parse("Json"), LogFormat::Json));
}

#[test]
fn test_log_format_parse_pretty_and_compact() {
    assert!(matches!(LogFormat::parse("pretty"), LogFormat::Pretty));
    assert!(matches!(LogFormat::parse("PRETTY"), LogFormat::Pretty));
    assert!(matches!(LogFormat::parse("compact"), LogFormat::Compact));
    assert!(matches!(LogFormat::parse("Compact"), LogFormat::Compact));
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    for input in ["invalid", "", "xml", "yaml", "123"] {
        assert!(
            matches!(LogFormat::parse(input), LogFormat::Json),
            "Failed for input: {input:?}"
        );
    }
}

#[test]
fn test_log_format_parse_whitespace() {
    assert!(matches!(LogFormat::parse("  json  "), LogFormat::Json));
    assert!(matches!(LogFormat::parse("pretty\n"), LogFormat::Pretty));
    assert!(matches!(LogFormat::parse("\tcompact"), LogFormat::Compact));
}

#[test]
fn test_parse_level_falls_back_to_info() {
    assert_eq!(parse_level("warn"), Level::WARN);
    assert_eq!(parse_level(" debug "), Level::DEBUG);
    assert_eq!(parse_level("verbose"), Level::INFO);
    assert_eq!(parse_level(""), Level::INFO);
}

#[test]
fn test_verbosity_flags_raise_the_level() {
    assert_eq!(level_from_verbosity(0), Level::INFO);
    assert_eq!(level_from_verbosity(1), Level::DEBUG);
    assert_eq!(level_from_verbosity(2), Level::TRACE);
    assert_eq!(level_from_verbosity(9), Level::TRACE);
}

#[test]
fn test_init_logging_twice_is_harmless() {
    init_logging(Level::DEBUG, LogFormat::Compact, false);
    init_logging(Level::INFO, LogFormat::Json, true);
    tracing::info!("still logging");
}
