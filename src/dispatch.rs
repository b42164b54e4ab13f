//! Playback of a script to the remote controller.
//!
//! A [`Player`] owns the interpreter bridge (and with it the scenario
//! store) and drives one script at a time through a poll loop:
//!
//! ```text
//! Idle --start--> Running <--> Suspended --done--> Idle
//!                    \____________/
//!                          | stop
//!                       Stopped
//! ```
//!
//! Full run: the interpreter is polled with `run()` every `fullRunPollMs`
//! until the script completes, then the recorded scenario is replayed:
//! iterations strictly in order, each one's delay slept first, its strips
//! compressed into blocks and sent concurrently. All sends of an iteration
//! are joined before the next iteration's delay starts; order across strips
//! within an iteration is best effort.
//!
//! Step ("explain") mode: the interpreter is polled with `step()` every
//! `stepPollMs` and whatever it just recorded is sent uncompressed straight
//! away, without waiting for the response. Responses are collected when the
//! script finishes.
//!
//! Every send fetches its own token. A stop drops the interpreter; requests
//! already in flight are not retracted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;

use crate::bridge::{EditorHooks, InterpreterBridge};
use crate::clock::Clock;
use crate::command::{compile_assignments, compile_blocks, Command};
use crate::compress::compress;
use crate::config::StripcastConfig;
use crate::controller::{ControllerClient, DispatchError, TransportError};
use crate::scenario::{IterationId, Scenario, StripId};
use crate::script_diagnostics::ScriptDiagnostic;
use crate::scripting::{Interpreter, ScriptInterpreter, ScriptOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    /// Record the whole script, then replay it compressed with its delays.
    FullRun,
    /// Send each operation as it executes.
    Step,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Running,
    /// Waiting on a script timer.
    Suspended,
    Stopped,
}

impl PlaybackState {
    pub fn is_active(self) -> bool {
        matches!(self, PlaybackState::Running | PlaybackState::Suspended)
    }
}

/// Cancels playback from anywhere; checked on every tick and between iterations.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A command batch the controller did not accept, kept for re-sending.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedBatch {
    pub iteration: IterationId,
    pub strip: Option<StripId>,
    pub commands: Vec<Command>,
    pub error: DispatchError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackReport {
    pub iterations_sent: usize,
    pub batches_sent: usize,
    pub commands_sent: usize,
    pub failed: Vec<FailedBatch>,
}

impl PlaybackReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, outcome: Result<usize, FailedBatch>) {
        match outcome {
            Ok(commands) => {
                self.batches_sent += 1;
                self.commands_sent += commands;
            }
            Err(failed) => {
                log::warn!(
                    "{} {}: batch of {} commands failed: {}",
                    failed.iteration,
                    failed.strip.as_ref().map(StripId::as_str).unwrap_or("-"),
                    failed.commands.len(),
                    failed.error
                );
                self.failed.push(failed);
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("playback already in progress ({0:?})")]
    AlreadyActive(PlaybackState),
    #[error("no playback in progress")]
    NotActive,
    #[error("nothing to send: the program did not set any LED")]
    EmptyScenario,
    /// `failed` holds batches that had already been sent and were rejected.
    #[error("script error: {diag}")]
    Script {
        diag: ScriptDiagnostic,
        failed: Vec<FailedBatch>,
    },
    #[error("playback stopped")]
    Stopped {
        resume_from: Option<IterationId>,
        failed: Vec<FailedBatch>,
    },
    #[error("scenario has no {0}")]
    UnknownIteration(IterationId),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl From<ScriptDiagnostic> for PlaybackError {
    fn from(diag: ScriptDiagnostic) -> Self {
        PlaybackError::Script {
            diag,
            failed: Vec::new(),
        }
    }
}

impl PlaybackError {
    /// Batches the controller rejected before playback ended.
    pub fn failed_batches(&self) -> &[FailedBatch] {
        match self {
            PlaybackError::Script { failed, .. } | PlaybackError::Stopped { failed, .. } => failed,
            _ => &[],
        }
    }
}

/// Result of one poll.
#[derive(Debug)]
pub enum Tick {
    /// Poll again after this interval.
    Pending(Duration),
    Finished(PlaybackReport),
}

type InFlight = JoinHandle<Result<usize, FailedBatch>>;

struct Session {
    mode: PlaybackMode,
    interpreter: Box<dyn Interpreter>,
    in_flight: Vec<InFlight>,
}

pub struct Player {
    controller: ControllerClient,
    clock: Arc<dyn Clock>,
    bridge: InterpreterBridge,
    script_options: ScriptOptions,
    full_run_poll: Duration,
    step_poll: Duration,
    session: Option<Session>,
    state: PlaybackState,
    stop: StopHandle,
}

fn send_batch(
    controller: &ControllerClient,
    iteration: IterationId,
    strip: Option<StripId>,
    commands: Vec<Command>,
) -> Result<usize, FailedBatch> {
    match controller.send_commands(&commands) {
        Ok(_) => Ok(commands.len()),
        Err(error) => Err(FailedBatch {
            iteration,
            strip,
            commands,
            error,
        }),
    }
}

/// Wait for step-mode sends and keep their outcomes.
fn join_in_flight(in_flight: Vec<InFlight>, report: &mut PlaybackReport) {
    for handle in in_flight {
        match handle.join() {
            Ok(outcome) => report.record(outcome),
            Err(_) => log::error!("step send thread panicked"),
        }
    }
}

fn lost_send(iteration: IterationId, strip: Option<StripId>, commands: Vec<Command>) -> FailedBatch {
    FailedBatch {
        iteration,
        strip,
        commands,
        error: DispatchError::Send(TransportError::Network("send thread panicked".to_string())),
    }
}

impl Player {
    pub fn new(
        config: &StripcastConfig,
        controller: ControllerClient,
        clock: Arc<dyn Clock>,
        hooks: Box<dyn EditorHooks>,
    ) -> Self {
        Self {
            controller,
            clock,
            bridge: InterpreterBridge::new(config.strip_capacity, config.default_row, hooks),
            script_options: config.script_options(),
            full_run_poll: config.full_run_poll(),
            step_poll: config.step_poll(),
            session: None,
            state: PlaybackState::Idle,
            stop: StopHandle::default(),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn bridge(&self) -> &InterpreterBridge {
        &self.bridge
    }

    /// The scenario recorded by the current or last run.
    pub fn scenario(&self) -> &Scenario {
        self.bridge.store().scenario()
    }

    /// Start playing `script`. Rejected while another playback is active.
    pub fn start(&mut self, script: &str, mode: PlaybackMode) -> Result<(), PlaybackError> {
        self.ensure_inactive()?;
        let interpreter = ScriptInterpreter::spawn(script, self.script_options, self.clock.clone())?;
        self.start_with(Box::new(interpreter), mode)
    }

    /// Start playback driven by an already constructed interpreter.
    pub fn start_with(&mut self, interpreter: Box<dyn Interpreter>, mode: PlaybackMode) -> Result<(), PlaybackError> {
        self.ensure_inactive()?;
        self.stop.clear();
        self.bridge.reset();
        self.session = Some(Session {
            mode,
            interpreter,
            in_flight: Vec::new(),
        });
        self.state = PlaybackState::Running;
        log::info!("playback started ({:?})", mode);
        Ok(())
    }

    fn ensure_inactive(&self) -> Result<(), PlaybackError> {
        if self.state.is_active() {
            return Err(PlaybackError::AlreadyActive(self.state));
        }
        Ok(())
    }

    /// Drop the interpreter and wait for requests already in flight.
    ///
    /// Returns the batches among them the controller rejected, or `None`
    /// if nothing was playing.
    pub fn stop(&mut self) -> Option<Vec<FailedBatch>> {
        let failed = self.end_session()?;
        self.state = PlaybackState::Stopped;
        log::info!("playback stopped");
        Some(failed)
    }

    /// Drop the session, joining its step-mode sends.
    fn end_session(&mut self) -> Option<Vec<FailedBatch>> {
        let session = self.session.take()?;
        let mut report = PlaybackReport::default();
        join_in_flight(session.in_flight, &mut report);
        Some(report.failed)
    }

    /// Poll the active playback once.
    pub fn tick(&mut self) -> Result<Tick, PlaybackError> {
        let mode = match &self.session {
            Some(session) => session.mode,
            None => return Err(PlaybackError::NotActive),
        };
        if self.stop.is_stopped() {
            let failed = self.stop().unwrap_or_default();
            return Err(PlaybackError::Stopped {
                resume_from: None,
                failed,
            });
        }

        match mode {
            PlaybackMode::FullRun => self.tick_full_run(),
            PlaybackMode::Step => self.tick_step(),
        }
    }

    /// Start `script` and poll it to the end, sleeping between polls.
    pub fn play(&mut self, script: &str, mode: PlaybackMode) -> Result<PlaybackReport, PlaybackError> {
        self.start(script, mode)?;
        self.finish()
    }

    /// Poll the active playback to the end.
    pub fn finish(&mut self) -> Result<PlaybackReport, PlaybackError> {
        loop {
            match self.tick()? {
                Tick::Pending(interval) => self.clock.sleep(interval),
                Tick::Finished(report) => return Ok(report),
            }
        }
    }

    fn fail(&mut self, diag: ScriptDiagnostic) -> PlaybackError {
        log::error!("script failed: {}", diag);
        let failed = self.end_session().unwrap_or_default();
        self.state = PlaybackState::Idle;
        PlaybackError::Script { diag, failed }
    }

    fn tick_full_run(&mut self) -> Result<Tick, PlaybackError> {
        let Some(session) = self.session.as_mut() else {
            return Err(PlaybackError::NotActive);
        };
        self.state = PlaybackState::Running;
        let outcome = session.interpreter.run(&mut self.bridge);

        match outcome {
            Err(diag) => Err(self.fail(diag)),
            Ok(true) => {
                self.state = PlaybackState::Suspended;
                Ok(Tick::Pending(self.full_run_poll))
            }
            Ok(false) => {
                self.session = None;
                let scenario = self.bridge.store().scenario().clone();
                if scenario.total_assignments() == 0 {
                    self.state = PlaybackState::Idle;
                    log::warn!("program finished without setting any LED");
                    return Err(PlaybackError::EmptyScenario);
                }
                log::info!(
                    "recorded {} iterations, {} assignments",
                    scenario.len(),
                    scenario.total_assignments()
                );
                let result = self.replay(&scenario, None);
                self.state = match result {
                    Err(PlaybackError::Stopped { .. }) => PlaybackState::Stopped,
                    _ => PlaybackState::Idle,
                };
                result.map(Tick::Finished)
            }
        }
    }

    fn tick_step(&mut self) -> Result<Tick, PlaybackError> {
        let Some(session) = self.session.as_mut() else {
            return Err(PlaybackError::NotActive);
        };
        self.state = PlaybackState::Running;
        let outcome = session.interpreter.step(&mut self.bridge);
        let suspended = session.interpreter.is_suspended();

        let fresh = self.bridge.store_mut().drain_new_assignments();
        if !fresh.is_empty() {
            let iteration = self.bridge.store().current_iteration();
            let strip = fresh.first().map(|a| a.strip.clone());
            let commands = compile_assignments(&fresh);
            let controller = self.controller.clone();
            log::debug!("{}: sending {} commands", iteration, commands.len());
            session
                .in_flight
                .push(std::thread::spawn(move || send_batch(&controller, iteration, strip, commands)));
        }

        match outcome {
            Err(diag) => Err(self.fail(diag)),
            Ok(true) => {
                self.state = if suspended {
                    PlaybackState::Suspended
                } else {
                    PlaybackState::Running
                };
                Ok(Tick::Pending(self.step_poll))
            }
            Ok(false) => {
                let in_flight = std::mem::take(&mut session.in_flight);
                self.session = None;
                self.state = PlaybackState::Idle;

                let mut report = PlaybackReport {
                    iterations_sent: self.scenario().len(),
                    ..PlaybackReport::default()
                };
                join_in_flight(in_flight, &mut report);
                log::info!(
                    "step playback finished: {} batches sent, {} failed",
                    report.batches_sent,
                    report.failed.len()
                );
                Ok(Tick::Finished(report))
            }
        }
    }

    /// Replay `scenario` with its delays, optionally starting at `from`.
    fn replay(&self, scenario: &Scenario, from: Option<IterationId>) -> Result<PlaybackReport, PlaybackError> {
        if let Some(id) = from {
            if scenario.get(&id).is_none() {
                return Err(PlaybackError::UnknownIteration(id));
            }
        }

        let mut report = PlaybackReport::default();
        for (id, entry) in scenario.iterations() {
            if from.map_or(false, |start| *id < start) {
                continue;
            }
            if self.stop.is_stopped() {
                return Err(PlaybackError::Stopped {
                    resume_from: Some(*id),
                    failed: report.failed,
                });
            }
            if entry.delay_ms > 0 {
                self.clock.sleep(Duration::from_millis(entry.delay_ms));
                if self.stop.is_stopped() {
                    return Err(PlaybackError::Stopped {
                        resume_from: Some(*id),
                        failed: report.failed,
                    });
                }
            }

            let batches: Vec<(StripId, Vec<Command>)> = entry
                .strip_assignments
                .iter()
                .map(|(strip, assignments)| (strip.clone(), compile_blocks(&compress(assignments))))
                .filter(|(_, commands)| !commands.is_empty())
                .collect();

            let controller = &self.controller;
            let outcomes: Vec<Result<usize, FailedBatch>> = std::thread::scope(|scope| {
                let handles: Vec<_> = batches
                    .into_iter()
                    .map(|(strip, commands)| {
                        let fallback = (strip.clone(), commands.clone());
                        let handle = scope.spawn(move || send_batch(controller, *id, Some(strip), commands));
                        (handle, fallback)
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|(handle, (strip, commands))| {
                        handle
                            .join()
                            .unwrap_or_else(|_| Err(lost_send(*id, Some(strip), commands)))
                    })
                    .collect()
            });

            let sent = outcomes.len();
            for outcome in outcomes {
                report.record(outcome);
            }
            report.iterations_sent += 1;
            log::info!("{} dispatched: {} strip batches (delay {}ms)", id, sent, entry.delay_ms);
        }
        Ok(report)
    }

    /// Replay a recorded scenario, starting at `from` (or the beginning).
    ///
    /// Used to resume after a failed or stopped full run.
    pub fn replay_from(&mut self, scenario: &Scenario, from: Option<IterationId>) -> Result<PlaybackReport, PlaybackError> {
        self.ensure_inactive()?;
        if scenario.total_assignments() == 0 {
            return Err(PlaybackError::EmptyScenario);
        }
        self.stop.clear();
        self.state = PlaybackState::Running;
        let result = self.replay(scenario, from);
        self.state = match result {
            Err(PlaybackError::Stopped { .. }) => PlaybackState::Stopped,
            _ => PlaybackState::Idle,
        };
        result
    }

    /// Re-send failed batches in order, each with a fresh token. Returns those that failed again.
    pub fn retry(&self, failed: &[FailedBatch]) -> Vec<FailedBatch> {
        failed
            .iter()
            .filter_map(|batch| {
                send_batch(&self.controller, batch.iteration, batch.strip.clone(), batch.commands.clone()).err()
            })
            .collect()
    }

    /// Clear every lighting request on the controller and the local scenario.
    pub fn reset_controller(&mut self) -> Result<(), PlaybackError> {
        self.ensure_inactive()?;
        self.controller.reset()?;
        self.bridge.reset();
        self.state = PlaybackState::Idle;
        log::info!("controller {} reset", self.controller.uuid());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{Effect, LogHooks};
    use crate::clock::ManualClock;
    use crate::color::HexColor;
    use crate::controller::Transport;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed list of effects, one per step.
    struct ScriptedInterpreter {
        effects: VecDeque<Effect>,
    }

    impl Interpreter for ScriptedInterpreter {
        fn run(&mut self, bridge: &mut InterpreterBridge) -> Result<bool, ScriptDiagnostic> {
            while self.step(bridge)? {}
            Ok(false)
        }

        fn step(&mut self, bridge: &mut InterpreterBridge) -> Result<bool, ScriptDiagnostic> {
            match self.effects.pop_front() {
                Some(effect) => {
                    bridge.apply(effect);
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }

    #[derive(Default)]
    struct CountingTransport {
        reject_tokens: bool,
        posts: Mutex<Vec<Value>>,
    }

    impl Transport for CountingTransport {
        fn get_json(&self, _path: &str) -> Result<Value, TransportError> {
            if self.reject_tokens {
                return Err(TransportError::Network("connection refused".into()));
            }
            Ok(json!({ "token": "t" }))
        }

        fn post_json(&self, _path: &str, _query: &[(&str, &str)], body: &Value) -> Result<Value, TransportError> {
            self.posts.lock().unwrap().push(body.clone());
            Ok(Value::Null)
        }
    }

    fn player(transport: Arc<CountingTransport>) -> Player {
        let config = StripcastConfig::default();
        let controller = ControllerClient::new(transport, "dev");
        Player::new(&config, controller, Arc::new(ManualClock::new()), Box::new(LogHooks::default()))
    }

    fn pixel(hex: &str) -> Effect {
        Effect::SetPixel {
            color: HexColor::parse(hex).unwrap(),
        }
    }

    #[test]
    fn test_full_run_compresses_per_strip() {
        let transport = Arc::new(CountingTransport::default());
        let mut player = player(transport.clone());
        let effects = VecDeque::from(vec![pixel("#ff0000"), pixel("#ff0000"), pixel("#00ff00")]);
        player
            .start_with(Box::new(ScriptedInterpreter { effects }), PlaybackMode::FullRun)
            .unwrap();
        let report = player.finish().unwrap();

        assert_eq!(report.batches_sent, 1);
        assert_eq!(report.commands_sent, 2);
        let posts = transport.posts.lock().unwrap();
        assert_eq!(posts[0][0]["interval"], 2);
        assert_eq!(posts[0][1]["color"], "0,255,0");
        assert_eq!(player.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_step_mode_sends_uncompressed() {
        let transport = Arc::new(CountingTransport::default());
        let mut player = player(transport.clone());
        let effects = VecDeque::from(vec![pixel("#ff0000"), pixel("#ff0000")]);
        player
            .start_with(Box::new(ScriptedInterpreter { effects }), PlaybackMode::Step)
            .unwrap();
        let report = player.finish().unwrap();

        assert_eq!(report.batches_sent, 2);
        assert_eq!(report.commands_sent, 2);
        let posts = transport.posts.lock().unwrap();
        assert!(posts.iter().all(|body| body[0]["interval"] == 1));
    }

    #[test]
    fn test_empty_scenario_is_reported() {
        let transport = Arc::new(CountingTransport::default());
        let mut player = player(transport.clone());
        let effects = VecDeque::from(vec![Effect::Alert { text: "no leds".into() }]);
        player
            .start_with(Box::new(ScriptedInterpreter { effects }), PlaybackMode::FullRun)
            .unwrap();
        assert!(matches!(player.finish(), Err(PlaybackError::EmptyScenario)));
        assert_eq!(player.state(), PlaybackState::Idle);
        assert!(transport.posts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_second_start_is_rejected_while_running() {
        let transport = Arc::new(CountingTransport::default());
        let mut player = player(transport);
        let first = ScriptedInterpreter {
            effects: VecDeque::from(vec![pixel("#ffffff")]),
        };
        let second = ScriptedInterpreter {
            effects: VecDeque::new(),
        };
        player.start_with(Box::new(first), PlaybackMode::FullRun).unwrap();
        let err = player
            .start_with(Box::new(second), PlaybackMode::FullRun)
            .unwrap_err();
        assert!(matches!(err, PlaybackError::AlreadyActive(PlaybackState::Running)));
    }

    #[test]
    fn test_stop_handle_stops_playback() {
        let transport = Arc::new(CountingTransport::default());
        let mut player = player(transport);
        let effects = VecDeque::from(vec![pixel("#ffffff")]);
        player
            .start_with(Box::new(ScriptedInterpreter { effects }), PlaybackMode::Step)
            .unwrap();
        player.stop_handle().stop();
        assert!(matches!(player.tick(), Err(PlaybackError::Stopped { .. })));
        assert_eq!(player.state(), PlaybackState::Stopped);
        assert!(matches!(player.tick(), Err(PlaybackError::NotActive)));
    }

    #[test]
    fn test_stop_keeps_rejected_step_sends() {
        let transport = Arc::new(CountingTransport {
            reject_tokens: true,
            ..CountingTransport::default()
        });
        let mut player = player(transport);
        let effects = VecDeque::from(vec![pixel("#ff0000"), pixel("#00ff00")]);
        player
            .start_with(Box::new(ScriptedInterpreter { effects }), PlaybackMode::Step)
            .unwrap();
        assert!(matches!(player.tick().unwrap(), Tick::Pending(_)));
        player.stop_handle().stop();

        match player.tick() {
            Err(PlaybackError::Stopped { failed, .. }) => {
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].iteration, IterationId(0));
                assert!(matches!(failed[0].error, DispatchError::Token(_)));
            }
            other => panic!("expected stop, got {:?}", other),
        }
        assert_eq!(player.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_direct_stop_returns_rejected_sends() {
        let transport = Arc::new(CountingTransport {
            reject_tokens: true,
            ..CountingTransport::default()
        });
        let mut player = player(transport);
        assert!(player.stop().is_none());

        let effects = VecDeque::from(vec![pixel("#ff0000"), pixel("#00ff00")]);
        player
            .start_with(Box::new(ScriptedInterpreter { effects }), PlaybackMode::Step)
            .unwrap();
        player.tick().unwrap();
        player.tick().unwrap();
        assert_eq!(player.stop().map(|failed| failed.len()), Some(2));
    }

    #[test]
    fn test_replay_from_unknown_iteration() {
        let transport = Arc::new(CountingTransport::default());
        let mut player = player(transport);
        let effects = VecDeque::from(vec![pixel("#ffffff")]);
        player
            .start_with(Box::new(ScriptedInterpreter { effects }), PlaybackMode::FullRun)
            .unwrap();
        player.finish().unwrap();
        let scenario = player.scenario().clone();
        assert!(matches!(
            player.replay_from(&scenario, Some(IterationId(9))),
            Err(PlaybackError::UnknownIteration(IterationId(9)))
        ));
    }
}
