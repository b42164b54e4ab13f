//! Headless recording.
//!
//! Runs a script to completion without a controller and returns the
//! scenario it produced. Used by the `record` and `export` commands and by
//! the documentation tests.

use std::sync::Arc;

use crate::bridge::{EditorHooks, InterpreterBridge, LogHooks};
use crate::clock::Clock;
use crate::config::StripcastConfig;
use crate::scenario::Scenario;
use crate::script_diagnostics::ScriptDiagnostic;
use crate::scripting::{Interpreter, ScriptInterpreter};

/// Result of a recording run.
#[derive(Debug)]
pub struct Recording {
    pub scenario: Scenario,
    /// Number of `run()` polls it took, including the final one.
    pub poll_count: usize,
}

/// Record `script` with log-only editor hooks.
pub fn record_script(script: &str, config: &StripcastConfig, clock: Arc<dyn Clock>) -> Result<Recording, ScriptDiagnostic> {
    record_script_with(script, config, clock, Box::new(LogHooks::default()))
}

/// Record `script`, sleeping `fullRunPollMs` between polls while it waits.
pub fn record_script_with(
    script: &str,
    config: &StripcastConfig,
    clock: Arc<dyn Clock>,
    hooks: Box<dyn EditorHooks>,
) -> Result<Recording, ScriptDiagnostic> {
    let mut bridge = InterpreterBridge::new(config.strip_capacity, config.default_row, hooks);
    let mut interpreter = ScriptInterpreter::spawn(script, config.script_options(), clock.clone())?;

    let mut poll_count = 1;
    while interpreter.run(&mut bridge)? {
        clock.sleep(config.full_run_poll());
        poll_count += 1;
    }

    let scenario = bridge.store().scenario().clone();
    log::info!(
        "Recording complete: {} polls, {} iterations, {} assignments",
        poll_count,
        scenario.len(),
        scenario.total_assignments()
    );

    Ok(Recording { scenario, poll_count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::scenario::{IterationId, StripId};
    use std::time::Duration;

    #[test]
    fn test_record_without_waits() {
        let clock = Arc::new(ManualClock::new());
        let script = r##"
            for i in 0..4 {
                addLed("#00ff00");
            }
        "##;
        let recording = record_script(script, &StripcastConfig::default(), clock).unwrap();
        assert_eq!(recording.poll_count, 1);
        assert_eq!(recording.scenario.len(), 1);
        assert_eq!(recording.scenario.total_assignments(), 4);
    }

    #[test]
    fn test_record_polls_through_waits() {
        let clock = Arc::new(ManualClock::new());
        let script = r##"
            addLed("#ff0000");
            waitForSeconds(0.5);
            addLedStrip("#0000ff", "strip_2");
        "##;
        let recording = record_script(script, &StripcastConfig::default(), clock.clone()).unwrap();

        // 500ms at 10ms per poll
        assert_eq!(recording.poll_count, 51);
        assert_eq!(clock.elapsed(), Duration::from_millis(500));
        let second = recording.scenario.get(&IterationId(1)).unwrap();
        assert_eq!(second.delay_ms, 500);
        assert!(second.strip_assignments.contains_key(&StripId::for_row(2)));
    }

    #[test]
    fn test_record_skips_waits_when_previews_are_off() {
        let clock = Arc::new(ManualClock::new());
        let config = StripcastConfig {
            preview_waits: false,
            ..StripcastConfig::default()
        };
        let recording = record_script("waitForSeconds(60); addLed(\"#ffffff\");", &config, clock.clone()).unwrap();
        assert_eq!(recording.poll_count, 1);
        assert_eq!(clock.elapsed(), Duration::ZERO);
        assert_eq!(recording.scenario.get(&IterationId(1)).unwrap().delay_ms, 60_000);
    }

    #[test]
    fn test_record_reports_script_errors() {
        let clock = Arc::new(ManualClock::new());
        let result = record_script("addLedStrip(\"#ffffff\", \"left\");", &StripcastConfig::default(), clock);
        assert!(result.is_err());
    }
}
