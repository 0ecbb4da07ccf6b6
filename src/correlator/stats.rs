use crate::hexdump::{BlockComparator, BlockDiff};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

/// An entry of the arrival order
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Seen {
    Command(u32),
    /// Decoded URI of an HTTP request
    Request(String),
}

impl std::fmt::Display for Seen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Seen::Command(id) => write!(f, "{}", id),
            Seen::Request(uri) => write!(f, "{:?}", uri),
        }
    }
}

/// Per-session counters, owned by the one correlator that updates them
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    packets: u64,
    shown: u64,
    counts: BTreeMap<u32, u64>,
    requests: u64,
    order: Vec<Seen>,
    errors: BTreeSet<u32>,
    unhandled: BTreeSet<u32>,
    payloads: BTreeMap<u32, BlockComparator>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn count_packet(&mut self) {
        self.packets += 1;
    }

    pub(crate) fn record_request(&mut self, uri: String) {
        self.requests += 1;
        self.order.push(Seen::Request(uri));
    }

    /// Counts a command and compares its payload against the first one seen for the same command
    pub(crate) fn record_command(&mut self, command: u32, payload: &[u8]) -> BlockDiff {
        self.shown += 1;
        *self.counts.entry(command).or_default() += 1;
        self.order.push(Seen::Command(command));
        self.payloads.entry(command).or_default().put(payload)
    }

    pub(crate) fn record_error(&mut self, command: u32) {
        self.errors.insert(command);
    }

    pub(crate) fn record_unhandled(&mut self, command: u32) {
        self.unhandled.insert(command);
    }

    /// Every packet handed to the correlator, matching or not
    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Frames that were counted and decoded
    pub fn shown(&self) -> u64 {
        self.shown
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    pub fn count(&self, command: u32) -> u64 {
        self.counts.get(&command).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &BTreeMap<u32, u64> {
        &self.counts
    }

    /// Commands and HTTP requests in the order they were first seen, repeats included
    pub fn order(&self) -> &[Seen] {
        &self.order
    }

    /// Commands that failed to decode at least once
    pub fn errors(&self) -> &BTreeSet<u32> {
        &self.errors
    }

    pub fn unhandled(&self) -> &BTreeSet<u32> {
        &self.unhandled
    }

    /// Whether every payload seen for `command` was identical. `None` if it was never seen.
    pub fn all_equal(&self, command: u32) -> Option<bool> {
        self.payloads.get(&command).map(BlockComparator::all_equal)
    }

    /// The end of session report
    pub fn report(&self) -> String {
        let mut out = format!(
            "Number of packets: {}\n........... shown: {}",
            self.packets, self.shown
        );
        let order: Vec<String> = self.order.iter().map(Seen::to_string).collect();
        write!(out, "\nOrder: [{}]", order.join(", ")).unwrap();
        for (command, count) in &self.counts {
            write!(out, "\ncmd {}: {}", command, count).unwrap();
            if count > &1 && self.all_equal(*command) == Some(true) {
                out.push_str(" (all equal)");
            }
        }
        if !self.errors.is_empty() {
            write!(out, "\nDecoding errors in cmds: {:?}", self.errors).unwrap();
        }
        if !self.unhandled.is_empty() {
            write!(out, "\nUnhandled cmds: {:?}", self.unhandled).unwrap();
        }
        out
    }
}
