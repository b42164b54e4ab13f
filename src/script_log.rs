//! Output of the script `alert()` function.
//!
//! Alerts print to stdout with an `[ALERT]` prefix. A runaway loop calling
//! `alert` could flood the terminal, so each run is capped at
//! [`MAX_ALERTS_PER_RUN`]; the first overflow is reported once and further
//! alerts are dropped until [`ScriptLogger::reset`].

/// Maximum number of alerts printed per script run.
pub const MAX_ALERTS_PER_RUN: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Alert,
    Warn,
}

impl LogLevel {
    fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Alert => "[ALERT]",
            LogLevel::Warn => "[WARN]",
        }
    }
}

pub fn emit_log(level: LogLevel, message: &str) {
    match level {
        LogLevel::Alert => println!("{} {}", level.prefix(), message),
        LogLevel::Warn => eprintln!("{} {}", level.prefix(), message),
    }
}

/// Convert a Rhai value to display text. Never panics.
pub fn stringify_dynamic(value: &rhai::Dynamic) -> String {
    if value.is_unit() {
        return String::new();
    }
    if let Ok(text) = value.clone().into_string() {
        return text;
    }
    if let Some(items) = value.clone().try_cast::<rhai::Array>() {
        return items.iter().map(stringify_dynamic).collect::<Vec<_>>().join(" ");
    }
    if let Some(map) = value.clone().try_cast::<rhai::Map>() {
        let parts: Vec<String> = map
            .iter()
            .map(|(k, v)| format!("{}: {}", k, stringify_dynamic(v)))
            .collect();
        return format!("{{{}}}", parts.join(", "));
    }
    // ints, floats, bools and anything else
    value.to_string()
}

/// Rate-limited alert sink for one run.
#[derive(Debug, Default)]
pub struct ScriptLogger {
    count: u32,
    warned: bool,
}

impl ScriptLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.warned = false;
    }

    fn can_log(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        if self.count <= MAX_ALERTS_PER_RUN {
            return true;
        }
        if !self.warned {
            self.warned = true;
            log::warn!("alert limit of {} per run reached, dropping further alerts", MAX_ALERTS_PER_RUN);
            emit_log(
                LogLevel::Warn,
                &format!("Script alert limit exceeded ({} messages/run). Further alerts dropped.", MAX_ALERTS_PER_RUN),
            );
        }
        false
    }

    /// Print an alert. Returns false if it was dropped.
    pub fn alert(&mut self, message: &str) -> bool {
        if !self.can_log() {
            return false;
        }
        emit_log(LogLevel::Alert, message);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stringify_string() {
        assert_eq!(stringify_dynamic(&rhai::Dynamic::from("hello")), "hello");
    }

    #[test]
    fn test_stringify_int_and_unit() {
        assert_eq!(stringify_dynamic(&rhai::Dynamic::from(42_i64)), "42");
        assert_eq!(stringify_dynamic(&rhai::Dynamic::UNIT), "");
    }

    #[test]
    fn test_stringify_array() {
        let arr: rhai::Array = vec![rhai::Dynamic::from("strip"), rhai::Dynamic::from(3_i64)];
        assert_eq!(stringify_dynamic(&rhai::Dynamic::from(arr)), "strip 3");
    }

    #[test]
    fn test_alert_limit() {
        let mut logger = ScriptLogger::new();
        for _ in 0..MAX_ALERTS_PER_RUN {
            assert!(logger.can_log());
        }
        assert!(!logger.can_log());
        assert!(!logger.can_log());

        logger.reset();
        assert!(logger.can_log());
    }
}
