// src/utils/logger.rs

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

#[cfg(target_arch = "wasm32")]
use worker::console_log;

#[cfg(not(target_arch = "wasm32"))]
macro_rules! console_log {
    ($($arg:tt)*) => {
        println!($($arg)*);
    };
}

/// Log levels supported by the logger, ordered least to most verbose.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }

    pub fn from_string(s: &str) -> LogLevel {
        match s.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            _ => LogLevel::Info,
        }
    }
}

/// Redacts substrings that should never reach logs: API credentials, mail
/// traces, and user email addresses. The ledger's click/save traces double
/// as bearer tokens for unauthenticated mail callbacks, so they get the same
/// treatment as API keys.
struct DataSanitizer {
    patterns: Vec<(Regex, &'static str)>,
}

impl DataSanitizer {
    fn new() -> Self {
        let patterns = vec![
            (
                Regex::new(r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b").unwrap(),
                "[UUID_REDACTED]",
            ),
            (
                Regex::new(r#""api_key"\s*:\s*"([a-zA-Z0-9_-]{16,})""#).unwrap(),
                r#""api_key":"[API_KEY_REDACTED]""#,
            ),
            (
                Regex::new(r"\bapi_key[:\s=]+['\x22]?([a-zA-Z0-9_-]{16,})['\x22]?").unwrap(),
                "api_key: [API_KEY_REDACTED]",
            ),
            (
                Regex::new(r#""(click_trace|save_trace|unsubscribe_trace)"\s*:\s*"([^"]+)""#).unwrap(),
                r#""trace":"[TRACE_REDACTED]""#,
            ),
            (
                Regex::new(r"\b[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}\b").unwrap(),
                "[EMAIL_REDACTED]",
            ),
            (
                Regex::new(r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}\b").unwrap(),
                "[IP_REDACTED]",
            ),
            (
                Regex::new(r#""password"\s*:\s*"([^"]+)""#).unwrap(),
                r#""password":"[PASSWORD_REDACTED]""#,
            ),
            (
                Regex::new(r"Authorization:\s*Bearer\s+[a-zA-Z0-9_.-]+").unwrap(),
                "Authorization: Bearer [TOKEN_REDACTED]",
            ),
        ];

        Self { patterns }
    }

    fn sanitize(&self, text: &str) -> String {
        let mut sanitized = text.to_string();
        for (pattern, replacement) in &self.patterns {
            sanitized = pattern.replace_all(&sanitized, *replacement).to_string();
        }
        sanitized
    }

    fn sanitize_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.sanitize(s)),
            Value::Object(map) => {
                let mut sanitized_map = serde_json::Map::new();
                for (k, v) in map {
                    sanitized_map.insert(self.sanitize(k), self.sanitize_value(v));
                }
                Value::Object(sanitized_map)
            }
            Value::Array(arr) => Value::Array(arr.iter().map(|v| self.sanitize_value(v)).collect()),
            _ => value.clone(),
        }
    }
}

static SANITIZER: OnceLock<DataSanitizer> = OnceLock::new();

fn get_sanitizer() -> &'static DataSanitizer {
    SANITIZER.get_or_init(DataSanitizer::new)
}

/// Structured logger for the living-lab core, usable both inside a Worker
/// and in native tests.
pub struct Logger {
    level: LogLevel,
    context: HashMap<String, Value>,
}

impl Logger {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            context: HashMap::new(),
        }
    }

    pub fn from_env() -> Self {
        let level_str = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        Self::new(LogLevel::from_string(&level_str))
    }

    pub fn child(&self, context: HashMap<String, Value>) -> Self {
        let mut new_context = self.context.clone();
        new_context.extend(context);
        Self {
            level: self.level.clone(),
            context: new_context,
        }
    }

    fn should_log(&self, level: &LogLevel) -> bool {
        level <= &self.level
    }

    fn format_message(&self, level: &LogLevel, message: &str, meta: Option<&Value>) -> String {
        let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f UTC");
        let sanitizer = get_sanitizer();
        let sanitized_message = sanitizer.sanitize(message);

        let mut log_obj = serde_json::json!({
            "timestamp": timestamp.to_string(),
            "level": level.as_str(),
            "message": sanitized_message,
        });

        if !self.context.is_empty() {
            let context_value = Value::Object(
                self.context
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            );
            log_obj["context"] = sanitizer.sanitize_value(&context_value);
        }

        if let Some(meta) = meta {
            log_obj["meta"] = sanitizer.sanitize_value(meta);
        }

        serde_json::to_string(&log_obj)
            .unwrap_or_else(|_| format!("[{}] {}: {}", timestamp, level.as_str(), sanitized_message))
    }

    pub fn error(&self, message: &str) {
        self.error_with_meta(message, None);
    }

    pub fn error_with_meta(&self, message: &str, meta: Option<&Value>) {
        if self.should_log(&LogLevel::Error) {
            console_log!("{}", self.format_message(&LogLevel::Error, message, meta));
        }
    }

    pub fn warn(&self, message: &str) {
        self.warn_with_meta(message, None);
    }

    pub fn warn_with_meta(&self, message: &str, meta: Option<&Value>) {
        if self.should_log(&LogLevel::Warn) {
            console_log!("{}", self.format_message(&LogLevel::Warn, message, meta));
        }
    }

    pub fn info(&self, message: &str) {
        self.info_with_meta(message, None);
    }

    pub fn info_with_meta(&self, message: &str, meta: Option<&Value>) {
        if self.should_log(&LogLevel::Info) {
            console_log!("{}", self.format_message(&LogLevel::Info, message, meta));
        }
    }

    pub fn debug(&self, message: &str) {
        self.debug_with_meta(message, None);
    }

    pub fn debug_with_meta(&self, message: &str, meta: Option<&Value>) {
        if self.should_log(&LogLevel::Debug) {
            console_log!("{}", self.format_message(&LogLevel::Debug, message, meta));
        }
    }
}

static GLOBAL_LOGGER: OnceLock<Logger> = OnceLock::new();

pub fn init_logger(level: LogLevel) {
    GLOBAL_LOGGER.set(Logger::new(level)).ok();
}

pub fn logger() -> &'static Logger {
    GLOBAL_LOGGER.get_or_init(Logger::from_env)
}

/// Installs a panic hook that forwards Rust panics to the Workers console
/// instead of silently aborting the isolate.
pub fn set_panic_hook() {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();
}

#[macro_export]
macro_rules! log_error {
    ($msg:expr) => {
        $crate::utils::logger::logger().error($msg)
    };
    ($msg:expr, $meta:expr) => {
        $crate::utils::logger::logger().error_with_meta($msg, Some(&$meta))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($msg:expr) => {
        $crate::utils::logger::logger().warn($msg)
    };
    ($msg:expr, $meta:expr) => {
        $crate::utils::logger::logger().warn_with_meta($msg, Some(&$meta))
    };
}

#[macro_export]
macro_rules! log_info {
    ($msg:expr) => {
        $crate::utils::logger::logger().info($msg)
    };
    ($msg:expr, $meta:expr) => {
        $crate::utils::logger::logger().info_with_meta($msg, Some(&$meta))
    };
}

#[macro_export]
macro_rules! log_debug {
    ($msg:expr) => {
        $crate::utils::logger::logger().debug($msg)
    };
    ($msg:expr, $meta:expr) => {
        $crate::utils::logger::logger().debug_with_meta($msg, Some(&$meta))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_ordering_is_error_warn_info_debug() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
    }

    #[test]
    fn log_level_from_string_defaults_to_info() {
        assert_eq!(LogLevel::from_string("error"), LogLevel::Error);
        assert_eq!(LogLevel::from_string("DEBUG"), LogLevel::Debug);
        assert_eq!(LogLevel::from_string("nonsense"), LogLevel::Info);
    }

    #[test]
    fn should_log_respects_configured_level() {
        let logger = Logger::new(LogLevel::Warn);
        assert!(logger.should_log(&LogLevel::Error));
        assert!(logger.should_log(&LogLevel::Warn));
        assert!(!logger.should_log(&LogLevel::Info));
    }

    #[test]
    fn sanitizer_redacts_email_and_trace_uuids() {
        let sanitizer = DataSanitizer::new();
        let text = "user test@example.com had trace 12345678-1234-1234-1234-123456789012";
        let sanitized = sanitizer.sanitize(text);
        assert!(sanitized.contains("[EMAIL_REDACTED]"));
        assert!(sanitized.contains("[UUID_REDACTED]"));
        assert!(!sanitized.contains("test@example.com"));
    }

    #[test]
    fn format_message_sanitizes_before_emitting() {
        let logger = Logger::new(LogLevel::Info);
        let formatted = logger.format_message(
            &LogLevel::Info,
            "digest sent to user@example.com",
            None,
        );
        assert!(formatted.contains("[EMAIL_REDACTED]"));
        assert!(!formatted.contains("user@example.com"));
    }
}
