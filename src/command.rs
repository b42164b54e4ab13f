//! Wire commands understood by the remote controller.
//!
//! ```json
//! {"action":"add","row":1,"led_column":0,"interval":2,"id_tag":null,
//!  "color":"255,0,0","id_node":0,"client":"server"}
//! ```

use serde::{Deserialize, Serialize};

use crate::compress::Block;
use crate::scenario::LedAssignment;

/// Client tag the controller expects on every `add` command.
pub const CLIENT_TAG: &str = "server";

/// Light `interval` LEDs of `row` from `led_column` on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddCommand {
    pub row: u32,
    pub led_column: u32,
    pub interval: u32,
    pub id_tag: Option<u32>,
    /// Decimal `R,G,B`.
    pub color: String,
    pub id_node: u32,
    pub client: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Command {
    Add(AddCommand),
    Reset,
}

impl Command {
    pub fn add(row: u32, led_column: u32, interval: u32, color: String) -> Self {
        Command::Add(AddCommand {
            row,
            led_column,
            interval,
            id_tag: None,
            color,
            id_node: 0,
            client: CLIENT_TAG.to_string(),
        })
    }
}

impl From<&Block> for Command {
    fn from(block: &Block) -> Self {
        Command::add(block.row.row(), block.start, block.interval, block.color.triplet())
    }
}

impl From<&LedAssignment> for Command {
    fn from(assignment: &LedAssignment) -> Self {
        Command::add(
            assignment.strip.row(),
            assignment.led_index,
            1,
            assignment.color.triplet(),
        )
    }
}

/// Compile compressed blocks (full-run playback).
pub fn compile_blocks(blocks: &[Block]) -> Vec<Command> {
    blocks.iter().map(Command::from).collect()
}

/// Compile raw assignments one command each (step playback).
pub fn compile_assignments(assignments: &[LedAssignment]) -> Vec<Command> {
    assignments.iter().map(Command::from).collect()
}

/// Body of a `reset-game` request.
pub fn reset_batch() -> Vec<Command> {
    vec![Command::Reset]
}
