//! Hex dumps and byte-level comparison of captured blocks.
//!
//! These are the main tools for reverse-engineering new commands: dump the body, highlight
//! the bytes that changed between two captures, and see which ones never move.

use std::fmt::Write;

const ROW_LEN: usize = 16;
/// Start of a highlighted span (yellow background)
pub const HIGHLIGHT_ON: &str = "\x1b[43m";
pub const HIGHLIGHT_OFF: &str = "\x1b[0m";

/// One line per 16 bytes: offset, hex bytes, then the printable ASCII.
///
/// Bytes whose offset is in `highlight` are wrapped in [`HIGHLIGHT_ON`](HIGHLIGHT_ON) /
/// [`HIGHLIGHT_OFF`](HIGHLIGHT_OFF), with one span per contiguous run and row.
/// Lines are joined with `\n`, without a trailing newline.
pub fn hex_dump(data: &[u8], highlight: &[usize]) -> String {
    let mut out = String::with_capacity(data.len() / ROW_LEN * 72 + 72);
    for (row, chunk) in data.chunks(ROW_LEN).enumerate() {
        let start = row * ROW_LEN;
        if row != 0 {
            out.push('\n');
        }
        write!(out, "{:04x}: ", start).unwrap();

        let mut in_span = false;
        for (pos, c) in chunk.iter().enumerate() {
            if pos != 0 {
                out.push(' ');
            }
            let lit = highlight.contains(&(start + pos));
            if lit && !in_span {
                out.push_str(HIGHLIGHT_ON);
                in_span = true;
            }
            write!(out, "{:02x}", c).unwrap();
            if in_span && (pos == chunk.len() - 1 || !highlight.contains(&(start + pos + 1))) {
                out.push_str(HIGHLIGHT_OFF);
                in_span = false;
            }
        }

        // Keep the ASCII column aligned on a short last row
        for _ in chunk.len()..ROW_LEN {
            out.push_str("   ");
        }
        out.push_str("  ");
        out.extend(chunk.iter().map(|&c| {
            if (0x20..=0x7e).contains(&c) {
                c as char
            } else {
                '.'
            }
        }));
    }
    out
}

/// [`hex_dump`](hex_dump) preceded by a `"<info> - length: N"` line (just `"length: N"` if `info` is empty)
pub fn hex_dump_titled(info: &str, data: &[u8], highlight: &[usize]) -> String {
    let mut out = if info.is_empty() {
        format!("length: {}", data.len())
    } else {
        format!("{} - length: {}", info, data.len())
    };
    if !data.is_empty() {
        out.push('\n');
        out.push_str(&hex_dump(data, highlight));
    }
    out
}

/// How a block compares to the first block a [`BlockComparator`](BlockComparator) saw
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum BlockDiff {
    /// Byte for byte identical (always the case for the first block)
    Same,
    /// Same length, these offsets differ
    Differs(Vec<usize>),
    LengthMismatch { expected: usize, actual: usize },
}

impl BlockDiff {
    /// Offsets to feed to [`hex_dump`](hex_dump) as highlights
    pub fn offsets(&self) -> &[usize] {
        match self {
            BlockDiff::Differs(offsets) => offsets,
            _ => &[],
        }
    }
}

/// Compares every block it's given against the first one.
///
/// ```
/// use fosc_proto::hexdump::{BlockComparator, BlockDiff};
///
/// let mut cmp = BlockComparator::new();
/// assert_eq!(cmp.put(b"abcd"), BlockDiff::Same);
/// assert_eq!(cmp.put(b"abXd"), BlockDiff::Differs(vec![2]));
/// assert!(!cmp.all_equal());
/// ```
#[derive(Debug, Clone)]
pub struct BlockComparator {
    base: Option<Vec<u8>>,
    all_equal: bool,
    count: usize,
}

impl Default for BlockComparator {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockComparator {
    pub fn new() -> Self {
        Self {
            base: None,
            all_equal: true,
            count: 0,
        }
    }

    pub fn put(&mut self, data: &[u8]) -> BlockDiff {
        self.count += 1;
        let base = match &self.base {
            None => {
                self.base = Some(data.to_vec());
                return BlockDiff::Same;
            }
            Some(base) => base,
        };
        if base.len() != data.len() {
            self.all_equal = false;
            return BlockDiff::LengthMismatch {
                expected: base.len(),
                actual: data.len(),
            };
        }
        if base[..] == data[..] {
            return BlockDiff::Same;
        }
        self.all_equal = false;
        BlockDiff::Differs(
            base.iter()
                .zip(data)
                .enumerate()
                .filter(|(_, (a, b))| a != b)
                .map(|(i, _)| i)
                .collect(),
        )
    }

    /// Whether every block so far matched the first one
    pub fn all_equal(&self) -> bool {
        self.all_equal
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_none()
    }

    /// The summary the reverse-engineering tools print at the end of a session
    pub fn summary(&self) -> String {
        let mut out = format!("Number of data blocks: {}", self.count);
        if self.base.is_some() && self.all_equal {
            out.push_str("\n*** All data blocks were identical");
        }
        out
    }
}

/// Runs `blocks` through a fresh [`BlockComparator`](BlockComparator)
pub fn compare_blocks<'a, I>(blocks: I) -> (Vec<BlockDiff>, bool)
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut cmp = BlockComparator::new();
    let diffs = blocks.into_iter().map(|b| cmp.put(b)).collect();
    (diffs, cmp.all_equal())
}
