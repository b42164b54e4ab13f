//! Native LED functions exposed to scripts, and the host side that applies them.
//!
//! Scripts run on a worker thread (see [`crate::scripting`]). Each native
//! call validates its arguments right there, so malformed colors or strip
//! ids fail the script at the offending call, then hands a typed
//! [`Effect`] to the host through an [`EffectPort`] and blocks until the
//! host lets it continue. The host applies effects to the scenario store
//! strictly in the order they were issued.
//!
//! Registered functions:
//! - `addLed(color)` - set the next pixel of the current default strip
//! - `addLedStrip(color, strip)` - set the next pixel of `strip` (`"strip_2"` or `2`)
//! - `changeStripLed()` - move the default strip to the next row
//! - `waitForSeconds(seconds)` - end the current iteration, wait
//! - `waitForSecondsForStrip(seconds, strip)` - same, scoped to one strip
//! - `highlightBlock(id)` - forward to the editor
//! - `alert(text)` - print a message

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use rhai::{Dynamic, Engine, EvalAltResult};

use crate::color::HexColor;
use crate::scenario::{ScenarioStore, StripId};
use crate::script_log::{stringify_dynamic, ScriptLogger};

/// One side effect requested by a script.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    SetPixel { color: HexColor },
    SetStripPixel { color: HexColor, strip: StripId },
    NextStrip,
    Wait { delay_ms: u64, strip: Option<StripId> },
    Highlight { block_id: String },
    Alert { text: String },
}

/// What the interpreter should do after an effect was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Continue,
    /// Suspend until this much time has passed.
    Wait(Duration),
}

/// Messages from the script worker to the host.
#[derive(Debug)]
pub enum WorkerMessage {
    Effect(Effect),
    Finished(Result<(), crate::script_diagnostics::ScriptDiagnostic>),
}

/// Worker-side end of the effect channel.
pub struct EffectPort {
    messages: Sender<WorkerMessage>,
    resume: Receiver<()>,
}

fn stopped() -> Box<EvalAltResult> {
    "interpreter stopped".into()
}

impl EffectPort {
    pub fn new(messages: Sender<WorkerMessage>, resume: Receiver<()>) -> Self {
        Self { messages, resume }
    }

    /// Hand `effect` to the host and block until it is applied.
    fn emit(&self, effect: Effect) -> Result<(), Box<EvalAltResult>> {
        self.messages
            .send(WorkerMessage::Effect(effect))
            .map_err(|_| stopped())?;
        self.resume.recv().map_err(|_| stopped())
    }
}

fn to_color(value: Dynamic) -> Result<HexColor, Box<EvalAltResult>> {
    let text = stringify_dynamic(&value);
    HexColor::parse(&text).map_err(|e| e.to_string().into())
}

fn to_strip(value: Dynamic) -> Result<StripId, Box<EvalAltResult>> {
    if let Some(row) = value.clone().try_cast::<rhai::INT>() {
        return u32::try_from(row)
            .map(StripId::for_row)
            .map_err(|_| format!("strip id {} is not a valid row", row).into());
    }
    StripId::parse(&stringify_dynamic(&value)).map_err(|e| e.to_string().into())
}

/// Convert a wait argument to whole milliseconds.
fn to_delay_ms(value: Dynamic) -> Result<u64, Box<EvalAltResult>> {
    let seconds = if let Some(f) = value.clone().try_cast::<rhai::FLOAT>() {
        f64::from(f)
    } else if let Some(i) = value.clone().try_cast::<rhai::INT>() {
        i as f64
    } else {
        return Err(format!("wait duration must be a number, got {}", value.type_name()).into());
    };

    if !seconds.is_finite() || seconds < 0.0 {
        return Err(format!("wait duration {} is not a non-negative number of seconds", seconds).into());
    }
    Ok((seconds * 1000.0).round() as u64)
}

/// Rhai prelude giving the LED functions their descriptive aliases.
pub const LED_API_PRELUDE: &str = r#"
fn setPixel(color) { addLed(color) }
fn setStripPixel(color, strip) { addLedStrip(color, strip) }
fn nextStrip() { changeStripLed() }
fn waitSeconds(seconds) { waitForSeconds(seconds) }
fn waitSecondsForStrip(seconds, strip) { waitForSecondsForStrip(seconds, strip) }
"#;

/// Register the LED API on a worker's engine.
pub fn register_led_api(engine: &mut Engine, port: std::rc::Rc<EffectPort>) {
    let p = port.clone();
    engine.register_fn("addLed", move |color: Dynamic| {
        p.emit(Effect::SetPixel { color: to_color(color)? })
    });

    let p = port.clone();
    engine.register_fn("addLedStrip", move |color: Dynamic, strip: Dynamic| {
        p.emit(Effect::SetStripPixel {
            color: to_color(color)?,
            strip: to_strip(strip)?,
        })
    });

    let p = port.clone();
    engine.register_fn("changeStripLed", move || p.emit(Effect::NextStrip));

    let p = port.clone();
    engine.register_fn("waitForSeconds", move |seconds: Dynamic| {
        p.emit(Effect::Wait {
            delay_ms: to_delay_ms(seconds)?,
            strip: None,
        })
    });

    let p = port.clone();
    engine.register_fn("waitForSecondsForStrip", move |seconds: Dynamic, strip: Dynamic| {
        p.emit(Effect::Wait {
            delay_ms: to_delay_ms(seconds)?,
            strip: Some(to_strip(strip)?),
        })
    });

    let p = port.clone();
    engine.register_fn("highlightBlock", move |id: Dynamic| {
        p.emit(Effect::Highlight {
            block_id: stringify_dynamic(&id),
        })
    });

    let p = port.clone();
    engine.register_fn("alert", move |text: Dynamic| {
        p.emit(Effect::Alert {
            text: stringify_dynamic(&text),
        })
    });

    let p = port;
    engine.register_fn("alert", move || p.emit(Effect::Alert { text: String::new() }));
}

/// The visual editor, as far as scripts can reach it.
pub trait EditorHooks {
    fn highlight_block(&mut self, block_id: &str);
    fn alert(&mut self, text: &str);
    /// A new run is starting.
    fn reset(&mut self) {}
}

/// Hooks for headless use: highlights are logged, alerts printed.
#[derive(Debug, Default)]
pub struct LogHooks {
    logger: ScriptLogger,
}

impl EditorHooks for LogHooks {
    fn highlight_block(&mut self, block_id: &str) {
        log::debug!("highlight block '{}'", block_id);
    }

    fn alert(&mut self, text: &str) {
        self.logger.alert(text);
    }

    fn reset(&mut self) {
        self.logger.reset();
    }
}

/// Host side of the bridge: owns the scenario store and the default strip cursor.
pub struct InterpreterBridge {
    store: ScenarioStore,
    first_row: u32,
    default_row: u32,
    hooks: Box<dyn EditorHooks>,
}

impl InterpreterBridge {
    pub fn new(capacity: u32, first_row: u32, hooks: Box<dyn EditorHooks>) -> Self {
        Self {
            store: ScenarioStore::new(capacity),
            first_row,
            default_row: first_row,
            hooks,
        }
    }

    /// Start over for a new run.
    pub fn reset(&mut self) {
        self.store.reset();
        self.default_row = self.first_row;
        self.hooks.reset();
    }

    /// Strip `addLed` currently writes to.
    pub fn default_strip(&self) -> StripId {
        StripId::for_row(self.default_row)
    }

    pub fn store(&self) -> &ScenarioStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ScenarioStore {
        &mut self.store
    }

    pub fn apply(&mut self, effect: Effect) -> Applied {
        match effect {
            Effect::SetPixel { color } => {
                let strip = self.default_strip();
                self.store.record_assignment(strip, color);
            }
            Effect::SetStripPixel { color, strip } => {
                self.store.record_assignment(strip, color);
            }
            Effect::NextStrip => {
                self.store.advance_strip();
                self.default_row = self.default_row.saturating_add(1);
            }
            Effect::Wait { delay_ms, strip } => {
                self.store.begin_iteration(delay_ms, strip);
                return Applied::Wait(Duration::from_millis(delay_ms));
            }
            Effect::Highlight { block_id } => self.hooks.highlight_block(&block_id),
            Effect::Alert { text } => self.hooks.alert(&text),
        }
        Applied::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::IterationId;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct RecordingHooks {
        events: Rc<RefCell<Vec<String>>>,
    }

    impl EditorHooks for RecordingHooks {
        fn highlight_block(&mut self, block_id: &str) {
            self.events.borrow_mut().push(format!("highlight:{}", block_id));
        }

        fn alert(&mut self, text: &str) {
            self.events.borrow_mut().push(format!("alert:{}", text));
        }
    }

    fn color(hex: &str) -> HexColor {
        HexColor::parse(hex).unwrap()
    }

    #[test]
    fn test_set_pixel_uses_default_strip() {
        let mut bridge = InterpreterBridge::new(32, 1, Box::new(LogHooks::default()));
        bridge.apply(Effect::SetPixel { color: color("#ff0000") });
        bridge.apply(Effect::NextStrip);
        bridge.apply(Effect::SetPixel { color: color("#00ff00") });

        let entry = bridge.store().scenario().get(&IterationId(0)).unwrap();
        assert_eq!(entry.strip_assignments[&StripId::for_row(1)].len(), 1);
        let second = &entry.strip_assignments[&StripId::for_row(2)];
        assert_eq!(second[0].led_index, 0);
        assert_eq!(bridge.store().strip_runs(), 1);
    }

    #[test]
    fn test_wait_opens_iteration_and_suspends() {
        let mut bridge = InterpreterBridge::new(32, 1, Box::new(LogHooks::default()));
        let applied = bridge.apply(Effect::Wait {
            delay_ms: 1500,
            strip: None,
        });
        assert_eq!(applied, Applied::Wait(Duration::from_millis(1500)));
        assert_eq!(bridge.store().current_iteration(), IterationId(1));
    }

    #[test]
    fn test_hooks_receive_highlight_and_alert() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let hooks = RecordingHooks { events: events.clone() };
        let mut bridge = InterpreterBridge::new(32, 1, Box::new(hooks));
        bridge.apply(Effect::Highlight { block_id: "b1".into() });
        bridge.apply(Effect::Alert { text: "hi".into() });
        assert_eq!(*events.borrow(), vec!["highlight:b1", "alert:hi"]);
    }

    #[test]
    fn test_reset_restores_default_strip() {
        let mut bridge = InterpreterBridge::new(32, 3, Box::new(LogHooks::default()));
        bridge.apply(Effect::NextStrip);
        assert_eq!(bridge.default_strip(), StripId::for_row(4));
        bridge.reset();
        assert_eq!(bridge.default_strip(), StripId::for_row(3));
    }

    #[test]
    fn test_argument_conversion() {
        assert_eq!(to_delay_ms(Dynamic::from(2_i64)).unwrap(), 2000);
        assert_eq!(to_delay_ms(Dynamic::from(0.25 as rhai::FLOAT)).unwrap(), 250);
        assert!(to_delay_ms(Dynamic::from(-1_i64)).is_err());
        assert!(to_delay_ms(Dynamic::from("soon")).is_err());

        assert_eq!(to_strip(Dynamic::from(5_i64)).unwrap(), StripId::for_row(5));
        assert_eq!(to_strip(Dynamic::from("strip_2")).unwrap().row(), 2);
        assert!(to_strip(Dynamic::from("left")).is_err());

        assert_eq!(to_color(Dynamic::from("#00FF00")).unwrap().as_str(), "#00ff00");
        assert!(to_color(Dynamic::from("#00f")).is_err());
    }
}
