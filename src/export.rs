//! Scenario export document.
//!
//! The compressed form of a recorded scenario, the way it would be sent,
//! written as pretty JSON alongside a hash of the script that produced it:
//!
//! ```json
//! {
//!   "generatedAt": "2026-01-01T12:00:00Z",
//!   "scriptHash": "9f86d0…",
//!   "stripCapacity": 32,
//!   "iterations": {
//!     "iteration_0": { "0":    [[{ "row": 1, "start": 0, "color": "255,0,0", "interval": 2 }]] },
//!     "iteration_1": { "1000": [[{ "row": 1, "start": 0, "color": "0,255,0", "interval": 1 }]] }
//!   }
//! }
//! ```

use std::path::Path;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::compress::{compress, Block};
use crate::scenario::{IterationId, Scenario};

/// One block as exported: the row number and a decimal color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportBlock {
    pub row: u32,
    pub start: u32,
    pub color: String,
    pub interval: u32,
}

impl From<&Block> for ExportBlock {
    fn from(block: &Block) -> Self {
        Self {
            row: block.row.row(),
            start: block.start,
            color: block.color.triplet(),
            interval: block.interval,
        }
    }
}

/// Blocks of one iteration keyed by its delay in milliseconds, one list per strip.
pub type ExportIteration = IndexMap<String, Vec<Vec<ExportBlock>>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioExport {
    pub generated_at: DateTime<Utc>,

    /// SHA-256 of the script text.
    pub script_hash: String,

    pub strip_capacity: u32,

    pub iterations: IndexMap<IterationId, ExportIteration>,
}

pub fn hash_script(script: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(script.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl ScenarioExport {
    pub fn new(script: &str, scenario: &Scenario, strip_capacity: u32) -> Self {
        let iterations = scenario
            .iterations()
            .map(|(id, entry)| {
                let strips: Vec<Vec<ExportBlock>> = entry
                    .strip_assignments
                    .values()
                    .map(|assignments| compress(assignments).iter().map(ExportBlock::from).collect::<Vec<_>>())
                    .collect();
                let mut by_delay = ExportIteration::new();
                by_delay.insert(entry.delay_ms.to_string(), strips);
                (*id, by_delay)
            })
            .collect();

        Self {
            generated_at: Utc::now(),
            script_hash: hash_script(script),
            strip_capacity,
            iterations,
        }
    }

    pub fn block_count(&self) -> usize {
        self.iterations
            .values()
            .flat_map(|by_delay| by_delay.values())
            .flatten()
            .map(Vec::len)
            .sum()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to a JSON file.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let json = self
            .to_json()
            .map_err(|e| format!("Failed to serialize scenario: {}", e))?;
        std::fs::write(path, json).map_err(|e| format!("Failed to write {:?}: {}", path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::HexColor;
    use crate::scenario::{ScenarioStore, StripId};

    fn scenario() -> Scenario {
        let mut store = ScenarioStore::new(32);
        let red = HexColor::parse("#ff0000").unwrap();
        store.record_assignment(StripId::for_row(1), red.clone());
        store.record_assignment(StripId::for_row(1), red);
        store.record_assignment(StripId::for_row(2), HexColor::parse("#0000ff").unwrap());
        store.begin_iteration(1000, None);
        store.record_assignment(StripId::for_row(1), HexColor::parse("#00ff00").unwrap());
        store.scenario().clone()
    }

    #[test]
    fn test_export_groups_blocks_by_delay_and_strip() {
        let export = ScenarioExport::new("addLed(\"#ff0000\");", &scenario(), 32);
        let value = serde_json::to_value(&export).unwrap();

        let first = &value["iterations"]["iteration_0"]["0"];
        assert_eq!(first.as_array().unwrap().len(), 2);
        assert_eq!(first[0][0]["interval"], 2);
        assert_eq!(first[0][0]["color"], "255,0,0");
        assert_eq!(first[1][0]["row"], 2);

        let second = &value["iterations"]["iteration_1"]["1000"];
        assert_eq!(second[0][0]["color"], "0,255,0");
        assert_eq!(value["stripCapacity"], 32);
        assert_eq!(export.block_count(), 3);
    }

    #[test]
    fn test_script_hash_is_sha256_hex() {
        assert_eq!(
            hash_script("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
