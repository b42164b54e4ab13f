//! Scenario data model and the store that records it.
//!
//! A scenario is the ordered list of iterations a script produced while it
//! ran. Each wait instruction closes the current iteration and opens a new
//! one carrying the wait's delay; every LED assignment lands in whichever
//! iteration is current when it executes.
//!
//! The store is mutated only by the interpreter bridge while a script runs.
//! The dispatcher reads it afterwards (full run) or drains the assignments
//! recorded since its last look (step mode).

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::color::HexColor;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("strip id '{0}' has no numeric row suffix (expected e.g. strip_1)")]
pub struct StripIdError(pub String);

/// Identifier of one addressable LED strip, e.g. `strip_1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StripId {
    name: String,
    row: u32,
}

impl StripId {
    pub fn parse(name: &str) -> Result<Self, StripIdError> {
        let name = name.trim();
        let suffix = name.rsplit('_').next().unwrap_or(name);
        let row = suffix
            .parse::<u32>()
            .map_err(|_| StripIdError(name.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            row,
        })
    }

    /// The conventional `strip_{row}` id.
    pub fn for_row(row: u32) -> Self {
        Self {
            name: format!("strip_{}", row),
            row,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Hardware row number addressed on the wire.
    pub fn row(&self) -> u32 {
        self.row
    }
}

impl fmt::Display for StripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl TryFrom<String> for StripId {
    type Error = StripIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StripId> for String {
    fn from(id: StripId) -> Self {
        id.name
    }
}

/// One recorded set-pixel operation. `led_index` is already wrapped to the
/// strip capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedAssignment {
    pub strip: StripId,
    pub led_index: u32,
    pub color: HexColor,
}

/// `iteration_{n}` key of an [`IterationEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IterationId(pub u32);

impl fmt::Display for IterationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "iteration_{}", self.0)
    }
}

impl Serialize for IterationId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IterationId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.strip_prefix("iteration_")
            .and_then(|n| n.parse().ok())
            .map(IterationId)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid iteration id '{}'", text)))
    }
}

/// A temporal phase of the scenario, delimited by wait instructions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationEntry {
    /// Delay requested by the wait that opened this iteration (0 for the first).
    pub delay_ms: u64,
    /// Strip the opening wait was scoped to, if any. Only relevant to previews.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoped_strip: Option<StripId>,
    /// Assignments per strip, strips in first-touched order.
    pub strip_assignments: IndexMap<StripId, Vec<LedAssignment>>,
}

impl IterationEntry {
    fn with_delay(delay_ms: u64, scoped_strip: Option<StripId>) -> Self {
        Self {
            delay_ms,
            scoped_strip,
            strip_assignments: IndexMap::new(),
        }
    }

    pub fn assignment_count(&self) -> usize {
        self.strip_assignments.values().map(Vec::len).sum()
    }
}

/// Ordered mapping from iteration id to entry, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scenario {
    iterations: IndexMap<IterationId, IterationEntry>,
}

impl Scenario {
    pub fn iterations(&self) -> impl Iterator<Item = (&IterationId, &IterationEntry)> {
        self.iterations.iter()
    }

    pub fn get(&self, id: &IterationId) -> Option<&IterationEntry> {
        self.iterations.get(id)
    }

    pub fn len(&self) -> usize {
        self.iterations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }

    pub fn total_assignments(&self) -> usize {
        self.iterations.values().map(IterationEntry::assignment_count).sum()
    }
}

/// Pixels currently shown for one strip. Cleared whenever its index returns to 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StripPreview {
    pub pixels: Vec<HexColor>,
}

/// Accumulates LED operations into a [`Scenario`].
#[derive(Debug)]
pub struct ScenarioStore {
    capacity: u32,
    scenario: Scenario,
    current: IterationId,
    next_iteration: u32,
    strip_runs: u32,
    previews: IndexMap<StripId, StripPreview>,
    fresh: Vec<LedAssignment>,
}

impl ScenarioStore {
    /// Create a store for strips holding `capacity` LEDs each.
    ///
    /// A capacity of zero is treated as one so index wrapping stays defined.
    pub fn new(capacity: u32) -> Self {
        let mut store = Self {
            capacity: capacity.max(1),
            scenario: Scenario::default(),
            current: IterationId(0),
            next_iteration: 0,
            strip_runs: 0,
            previews: IndexMap::new(),
            fresh: Vec::new(),
        };
        store.reset();
        store
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Drop everything and start again from an empty `iteration_0`.
    pub fn reset(&mut self) {
        self.scenario.iterations.clear();
        self.previews.clear();
        self.fresh.clear();
        self.strip_runs = 0;
        self.next_iteration = 0;
        self.open_iteration(0, None);
    }

    fn open_iteration(&mut self, delay_ms: u64, scoped_strip: Option<StripId>) -> IterationId {
        let id = IterationId(self.next_iteration);
        self.next_iteration += 1;
        self.scenario
            .iterations
            .insert(id, IterationEntry::with_delay(delay_ms, scoped_strip));
        self.current = id;
        id
    }

    /// Record one set-pixel operation against `strip` in the current iteration.
    pub fn record_assignment(&mut self, strip: StripId, color: HexColor) -> LedAssignment {
        let capacity = self.capacity;
        let entry = self
            .scenario
            .iterations
            .entry(self.current)
            .or_default();
        let assignments = entry.strip_assignments.entry(strip.clone()).or_default();
        let occupancy = assignments.len() as u64;
        let led_index = (occupancy % u64::from(capacity)) as u32;

        let assignment = LedAssignment {
            strip: strip.clone(),
            led_index,
            color: color.clone(),
        };
        assignments.push(assignment.clone());

        // The preview mirrors the strip: pixel `led_index` is always the last one.
        let preview = self.previews.entry(strip).or_default();
        if led_index == 0 {
            preview.pixels.clear();
        }
        preview.pixels.push(color);

        log::debug!(
            "{} {}[{}] = {}",
            self.current,
            assignment.strip,
            assignment.led_index,
            assignment.color
        );
        self.fresh.push(assignment.clone());
        assignment
    }

    /// Marker for a strip change; the bridge picks the next default strip.
    pub fn advance_strip(&mut self) {
        self.strip_runs += 1;
        log::debug!("{}: strip run {}", self.current, self.strip_runs);
    }

    /// Number of `advance_strip` markers since the last reset.
    pub fn strip_runs(&self) -> u32 {
        self.strip_runs
    }

    /// Open a new iteration after a wait of `delay_ms` and make it current.
    pub fn begin_iteration(&mut self, delay_ms: u64, scoped_strip: Option<StripId>) -> IterationId {
        let id = self.open_iteration(delay_ms, scoped_strip);
        log::debug!("{} opened (delay {}ms)", id, delay_ms);
        id
    }

    pub fn current_iteration(&self) -> IterationId {
        self.current
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn preview(&self, strip: &StripId) -> Option<&StripPreview> {
        self.previews.get(strip)
    }

    /// Assignments recorded since the previous call, in execution order.
    pub fn drain_new_assignments(&mut self) -> Vec<LedAssignment> {
        std::mem::take(&mut self.fresh)
    }
}
