//! Run-length grouping of LED assignments into blocks.
//!
//! The controller accepts `(row, start, interval, color)` ranges, so a strip
//! filled with one color costs a single command instead of one per LED.

use serde::{Deserialize, Serialize};

use crate::color::HexColor;
use crate::scenario::{LedAssignment, StripId};

/// `interval` consecutive LEDs on `row` starting at `start`, all `color`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub row: StripId,
    pub start: u32,
    pub color: HexColor,
    pub interval: u32,
}

impl Block {
    fn open(assignment: &LedAssignment) -> Self {
        Self {
            row: assignment.strip.clone(),
            start: assignment.led_index,
            color: assignment.color.clone(),
            interval: 1,
        }
    }

    /// Whether `next` continues this run: same strip and color, next index.
    fn extends_to(&self, next: &LedAssignment) -> bool {
        self.row == next.strip
            && self.color == next.color
            && u64::from(self.start) + u64::from(self.interval) == u64::from(next.led_index)
    }

    /// The individual assignments this block stands for.
    pub fn expand(&self) -> impl Iterator<Item = LedAssignment> + '_ {
        (0..self.interval).map(move |offset| LedAssignment {
            strip: self.row.clone(),
            led_index: self.start + offset,
            color: self.color.clone(),
        })
    }
}

/// Group an ordered assignment list into maximal runs, in a single pass.
///
/// Order is preserved and nothing is deduplicated; a wrapped strip that
/// rewrites slot 0 simply opens a new block.
pub fn compress(assignments: &[LedAssignment]) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    for assignment in assignments {
        match blocks.last_mut() {
            Some(block) if block.extends_to(assignment) => block.interval += 1,
            _ => blocks.push(Block::open(assignment)),
        }
    }
    blocks
}

/// Inverse of [`compress`].
pub fn expand(blocks: &[Block]) -> Vec<LedAssignment> {
    blocks.iter().flat_map(Block::expand).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assign(row: u32, index: u32, color: &str) -> LedAssignment {
        LedAssignment {
            strip: StripId::for_row(row),
            led_index: index,
            color: HexColor::parse(color).unwrap(),
        }
    }

    #[test]
    fn test_compress_example() {
        let input = vec![
            assign(1, 0, "#ff0000"),
            assign(1, 1, "#ff0000"),
            assign(1, 2, "#00ff00"),
        ];
        let blocks = compress(&input);
        assert_eq!(
            blocks,
            vec![
                Block {
                    row: StripId::for_row(1),
                    start: 0,
                    color: HexColor::parse("#ff0000").unwrap(),
                    interval: 2,
                },
                Block {
                    row: StripId::for_row(1),
                    start: 2,
                    color: HexColor::parse("#00ff00").unwrap(),
                    interval: 1,
                },
            ]
        );
    }

    #[test]
    fn test_compress_empty() {
        assert!(compress(&[]).is_empty());
    }

    #[test]
    fn test_gap_in_index_splits_block() {
        let input = vec![assign(1, 0, "#ffffff"), assign(1, 2, "#ffffff")];
        assert_eq!(compress(&input).len(), 2);
    }

    #[test]
    fn test_wrap_starts_new_block() {
        // capacity 3: indices 0,1,2,0,1 all white
        let input: Vec<_> = [0, 1, 2, 0, 1].iter().map(|&i| assign(1, i, "#ffffff")).collect();
        let blocks = compress(&input);
        assert_eq!(blocks.len(), 2);
        assert_eq!((blocks[0].start, blocks[0].interval), (0, 3));
        assert_eq!((blocks[1].start, blocks[1].interval), (0, 2));
    }

    #[test]
    fn test_case_variants_share_a_block() {
        let input = vec![assign(1, 0, "#FF0000"), assign(1, 1, "#ff0000")];
        assert_eq!(compress(&input).len(), 1);
    }

    #[test]
    fn test_duplicate_runs_are_kept() {
        let input = vec![
            assign(1, 0, "#0000ff"),
            assign(1, 0, "#0000ff"),
        ];
        let blocks = compress(&input);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], blocks[1]);
    }

    #[test]
    fn test_round_trip_preserves_order() {
        let colors = ["#ff0000", "#ff0000", "#00ff00", "#00ff00", "#ff0000", "#0000ff"];
        let input: Vec<_> = [0, 1, 2, 3, 5, 6]
            .iter()
            .zip(colors.iter())
            .map(|(&i, c)| assign(4, i, c))
            .collect();
        assert_eq!(expand(&compress(&input)), input);
    }

    #[test]
    fn test_compress_is_idempotent_on_maximal_blocks() {
        let input: Vec<_> = (0..10)
            .map(|i| assign(2, i % 6, if i < 4 { "#101010" } else { "#202020" }))
            .collect();
        let blocks = compress(&input);
        assert_eq!(compress(&expand(&blocks)), blocks);
    }
}
