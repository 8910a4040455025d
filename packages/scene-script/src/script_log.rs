//! Script logging for Rhai scripts.
//!
//! Provides a `log` global object to scripts with `info`, `warn`, and `error`
//! methods, and backs Rhai's `print`/`debug` statements. Messages go to the
//! `log` facade under the `script` target, limited to a fixed number per tick.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use rhai::{Dynamic, Engine};

const TARGET: &str = "script";

/// Log level for script messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_log_level(self) -> log::Level {
        match self {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

/// Per-tick message allowance, shared between the host and the script worker.
#[derive(Debug)]
pub struct LogBudget {
    limit: u32,
    count: AtomicU32,
    warned: AtomicBool,
}

impl LogBudget {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            count: AtomicU32::new(0),
            warned: AtomicBool::new(false),
        }
    }

    /// Reset the counter. Call this at the start of each tick.
    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.warned.store(false, Ordering::Relaxed);
    }

    /// Take one message from the allowance. Returns false once it is spent.
    fn try_take(&self) -> bool {
        let count = self.count.fetch_add(1, Ordering::Relaxed);
        if count < self.limit {
            return true;
        }
        if !self.warned.swap(true, Ordering::Relaxed) {
            log::warn!(
                target: TARGET,
                "Script log limit exceeded ({} messages/tick). Further logs dropped.",
                self.limit
            );
        }
        false
    }
}

/// Convert a Rhai Dynamic value to a string safely.
pub fn stringify_dynamic(value: &Dynamic) -> String {
    if let Ok(s) = value.clone().into_string() {
        return s;
    }

    if let Some(arr) = value.clone().try_cast::<rhai::Array>() {
        let parts: Vec<String> = arr.iter().map(stringify_dynamic).collect();
        return parts.join(" ");
    }

    if let Some(map) = value.clone().try_cast::<rhai::Map>() {
        let parts: Vec<String> = map
            .iter()
            .map(|(k, v)| format!("{}: {}", k, stringify_dynamic(v)))
            .collect();
        return format!("{{{}}}", parts.join(", "));
    }

    if value.is_unit() {
        return "()".to_string();
    }

    // Numbers, bools and custom types all have a usable Display.
    value.to_string()
}

/// The `log` object scripts see.
#[derive(Debug, Clone)]
pub struct ScriptLogger {
    budget: Arc<LogBudget>,
}

impl ScriptLogger {
    pub fn new(budget: Arc<LogBudget>) -> Self {
        Self { budget }
    }

    pub fn emit(&self, level: LogLevel, message: &str) {
        if self.budget.try_take() {
            log::log!(target: TARGET, level.as_log_level(), "{}", message);
        }
    }

    pub fn info(&mut self, value: Dynamic) {
        self.emit(LogLevel::Info, &stringify_dynamic(&value));
    }

    pub fn warn(&mut self, value: Dynamic) {
        self.emit(LogLevel::Warn, &stringify_dynamic(&value));
    }

    pub fn error(&mut self, value: Dynamic) {
        self.emit(LogLevel::Error, &stringify_dynamic(&value));
    }
}

/// Register the `Log` type and route `print`/`debug` through `logger`.
pub fn register_log_api(engine: &mut Engine, logger: &ScriptLogger) {
    engine.register_type_with_name::<ScriptLogger>("Log");
    engine.register_fn("info", ScriptLogger::info);
    engine.register_fn("warn", ScriptLogger::warn);
    engine.register_fn("error", ScriptLogger::error);

    let printer = logger.clone();
    engine.on_print(move |text| printer.emit(LogLevel::Info, text));

    let debugger = logger.clone();
    engine.on_debug(move |text, _source, pos| {
        debugger.emit(LogLevel::Debug, &format!("{pos:?} {text}"));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stringify_string() {
        let value = Dynamic::from("hello");
        assert_eq!(stringify_dynamic(&value), "hello");
    }

    #[test]
    fn test_stringify_int() {
        let value = Dynamic::from(42_i64);
        assert_eq!(stringify_dynamic(&value), "42");
    }

    #[test]
    fn test_stringify_bool() {
        let value = Dynamic::from(true);
        assert_eq!(stringify_dynamic(&value), "true");
    }

    #[test]
    fn test_stringify_array() {
        let mut arr = rhai::Array::new();
        arr.push(Dynamic::from("ids"));
        arr.push(Dynamic::from(3_i64));
        let value = Dynamic::from(arr);
        assert_eq!(stringify_dynamic(&value), "ids 3");
    }

    #[test]
    fn test_stringify_map() {
        let mut map = rhai::Map::new();
        map.insert("x".into(), Dynamic::from(1_i64));
        assert_eq!(stringify_dynamic(&Dynamic::from(map)), "{x: 1}");
    }

    #[test]
    fn test_tick_log_limit() {
        let budget = LogBudget::new(3);

        for _ in 0..3 {
            assert!(budget.try_take());
        }
        assert!(!budget.try_take());
        assert!(!budget.try_take());

        budget.reset();
        assert!(budget.try_take());
    }

    #[test]
    fn test_log_object_in_script() {
        let budget = Arc::new(LogBudget::new(2));
        let logger = ScriptLogger::new(budget.clone());
        let mut engine = Engine::new();
        register_log_api(&mut engine, &logger);

        let mut scope = rhai::Scope::new();
        scope.push("log", logger);
        engine
            .run_with_scope(&mut scope, r#"log.info("a"); log.warn([1, 2]); print("dropped");"#)
            .unwrap();

        assert!(!budget.try_take());
    }
}
