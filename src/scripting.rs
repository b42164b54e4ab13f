//! Sandboxed Rhai interpreter driving the LED bridge.
//!
//! Rhai evaluates a script in one call and cannot suspend half way, so each
//! script runs on its own worker thread and is driven like a coroutine:
//! every native LED call sends its [`Effect`] to the host and parks until
//! the host resumes it. That gives the cooperative contract the dispatcher
//! needs:
//!
//! - [`Interpreter::step`] applies exactly one native call (or observes
//!   completion) and reports whether work remains;
//! - [`Interpreter::run`] keeps stepping until the script completes or is
//!   suspended on a wait timer that has not fired yet.
//!
//! Only the host thread touches the scenario store, and it applies effects
//! in the order the script issued them. Dropping a [`ScriptInterpreter`]
//! stops it: the parked worker wakes with an error and unwinds.
//!
//! Scripts see the functions registered by [`crate::bridge`] plus these
//! aliases from the prelude: `setPixel`, `setStripPixel`, `nextStrip`,
//! `waitSeconds`, `waitSecondsForStrip`.

use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use rhai::Engine;

use crate::bridge::{register_led_api, Applied, EffectPort, InterpreterBridge, WorkerMessage, LED_API_PRELUDE};
use crate::clock::Clock;
use crate::script_diagnostics::{from_eval_error, from_parse_error, ScriptDiagnostic, ScriptPhase};

/// The stepping contract the dispatcher drives.
pub trait Interpreter {
    /// Execute until completion or an unexpired wait. `Ok(true)` means more work remains.
    fn run(&mut self, bridge: &mut InterpreterBridge) -> Result<bool, ScriptDiagnostic>;

    /// Execute one elementary operation. `Ok(true)` means more work remains.
    fn step(&mut self, bridge: &mut InterpreterBridge) -> Result<bool, ScriptDiagnostic>;

    /// Parked on a wait timer that has not fired yet.
    fn is_suspended(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScriptOptions {
    /// Rhai operation budget; 0 disables the limit.
    pub max_operations: u64,
    /// Whether wait calls suspend for their full duration.
    pub honor_waits: bool,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            max_operations: 500_000,
            honor_waits: true,
        }
    }
}

/// Create an engine with the sandbox limits applied.
fn sandboxed_engine(options: &ScriptOptions) -> Engine {
    let mut engine = Engine::new();

    engine.set_max_expr_depths(64, 64);
    engine.set_max_call_levels(64);
    engine.set_max_operations(options.max_operations);
    engine.set_max_string_size(10_000);
    engine.set_max_array_size(1_000);
    engine.set_max_map_size(500);

    engine
}

fn full_source(script: &str) -> (String, usize) {
    let offset = LED_API_PRELUDE.matches('\n').count();
    (format!("{LED_API_PRELUDE}{script}"), offset)
}

/// Check that `script` parses, without running it.
pub fn check_script(script: &str, options: &ScriptOptions) -> Result<(), ScriptDiagnostic> {
    let engine = sandboxed_engine(options);
    let (source, offset) = full_source(script);
    engine
        .compile(&source)
        .map(|_| ())
        .map_err(|e| from_parse_error(&e, offset))
}

fn worker(source: String, user_line_offset: usize, options: ScriptOptions, messages: Sender<WorkerMessage>, resume: Receiver<()>) {
    let mut engine = sandboxed_engine(&options);
    let port = Rc::new(EffectPort::new(messages.clone(), resume));
    register_led_api(&mut engine, port);

    let outcome = engine
        .run(&source)
        .map_err(|e| from_eval_error(ScriptPhase::Run, &e, user_line_offset));
    if let Err(diag) = &outcome {
        log::debug!("script worker finished with error: {}", diag);
    }
    // The host may already be gone after a stop.
    let _ = messages.send(WorkerMessage::Finished(outcome));
}

/// A running script.
pub struct ScriptInterpreter {
    messages: Receiver<WorkerMessage>,
    resume: Option<Sender<()>>,
    clock: Arc<dyn Clock>,
    honor_waits: bool,
    /// The worker is blocked waiting for us to resume it.
    parked: bool,
    wait_until: Option<Instant>,
    finished: bool,
}

impl ScriptInterpreter {
    /// Compile `script` and start it on a worker thread.
    ///
    /// The worker runs up to its first native call straight away and then
    /// waits for the first [`Interpreter::step`].
    pub fn spawn(script: &str, options: ScriptOptions, clock: Arc<dyn Clock>) -> Result<Self, ScriptDiagnostic> {
        check_script(script, &options)?;

        let (source, offset) = full_source(script);
        let (message_tx, message_rx) = crossbeam_channel::unbounded();
        let (resume_tx, resume_rx) = crossbeam_channel::bounded(1);

        std::thread::Builder::new()
            .name("stripcast-script".to_string())
            .spawn(move || worker(source, offset, options, message_tx, resume_rx))
            .map_err(|e| ScriptDiagnostic::host(format!("failed to start script worker: {}", e)))?;

        Ok(Self {
            messages: message_rx,
            resume: Some(resume_tx),
            clock,
            honor_waits: options.honor_waits,
            parked: false,
            wait_until: None,
            finished: false,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish(&mut self) {
        self.finished = true;
        self.parked = false;
        self.wait_until = None;
        self.resume = None;
    }
}

impl Interpreter for ScriptInterpreter {
    fn is_suspended(&self) -> bool {
        self.wait_until
            .map_or(false, |deadline| self.clock.now() < deadline)
    }

    fn run(&mut self, bridge: &mut InterpreterBridge) -> Result<bool, ScriptDiagnostic> {
        loop {
            if self.is_suspended() {
                return Ok(true);
            }
            if !self.step(bridge)? {
                return Ok(false);
            }
        }
    }

    fn step(&mut self, bridge: &mut InterpreterBridge) -> Result<bool, ScriptDiagnostic> {
        if self.finished {
            return Ok(false);
        }
        if let Some(deadline) = self.wait_until {
            if self.clock.now() < deadline {
                return Ok(true);
            }
            self.wait_until = None;
        }

        if self.parked {
            self.parked = false;
            if let Some(resume) = &self.resume {
                // A failed send means the worker already exited; its
                // Finished message is waiting below.
                let _ = resume.send(());
            }
        }

        match self.messages.recv() {
            Ok(WorkerMessage::Effect(effect)) => {
                self.parked = true;
                if let Applied::Wait(delay) = bridge.apply(effect) {
                    if self.honor_waits && !delay.is_zero() {
                        self.wait_until = Some(self.clock.now() + delay);
                    }
                }
                Ok(true)
            }
            Ok(WorkerMessage::Finished(outcome)) => {
                self.finish();
                outcome.map(|()| false)
            }
            Err(_) => {
                self.finish();
                Err(ScriptDiagnostic::host("script worker exited unexpectedly"))
            }
        }
    }
}
