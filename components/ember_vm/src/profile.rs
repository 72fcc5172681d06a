//! Per-opcode execution profiling.

use ember_bytecode::{Op, OP_COUNT};

/// Execution counts and cumulative time per opcode.
///
/// Recording is off by default; enable it through
/// `VmConfig::enable_profiling`. Indexing is by `Op::index`, so lookups
/// are array reads and add no allocation to the dispatch loop.
#[derive(Debug, Clone)]
pub struct OpcodeProfile {
    counts: [u64; OP_COUNT],
    nanos: [u64; OP_COUNT],
}

impl Default for OpcodeProfile {
    fn default() -> Self {
        Self::new()
    }
}

impl OpcodeProfile {
    /// Create an empty profile.
    pub fn new() -> Self {
        Self {
            counts: [0; OP_COUNT],
            nanos: [0; OP_COUNT],
        }
    }

    /// Record one execution of an opcode.
    pub fn record(&mut self, op: Op, nanos: u64) {
        let i = op.index();
        self.counts[i] += 1;
        self.nanos[i] += nanos;
    }

    /// Times an opcode has executed.
    pub fn count(&self, op: Op) -> u64 {
        self.counts[op.index()]
    }

    /// Cumulative nanoseconds spent in an opcode.
    pub fn nanos(&self, op: Op) -> u64 {
        self.nanos[op.index()]
    }

    /// Total instructions executed.
    pub fn total_count(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// The opcode with the highest execution count, if any ran.
    pub fn hottest(&self) -> Option<Op> {
        Op::ALL
            .iter()
            .copied()
            .filter(|op| self.count(*op) > 0)
            .max_by_key(|op| self.count(*op))
    }

    /// Visit every opcode that executed at least once.
    pub fn for_each(&self, mut f: impl FnMut(Op, u64, u64)) {
        for op in Op::ALL {
            let i = op.index();
            if self.counts[i] > 0 {
                f(op, self.counts[i], self.nanos[i]);
            }
        }
    }

    /// Zero all counters.
    pub fn reset(&mut self) {
        self.counts = [0; OP_COUNT];
        self.nanos = [0; OP_COUNT];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_query() {
        let mut profile = OpcodeProfile::new();
        profile.record(Op::Add, 10);
        profile.record(Op::Add, 15);
        profile.record(Op::Pop, 3);

        assert_eq!(profile.count(Op::Add), 2);
        assert_eq!(profile.nanos(Op::Add), 25);
        assert_eq!(profile.count(Op::Pop), 1);
        assert_eq!(profile.total_count(), 3);
        assert_eq!(profile.hottest(), Some(Op::Add));
    }

    #[test]
    fn test_empty_profile_has_no_hottest() {
        assert_eq!(OpcodeProfile::new().hottest(), None);
    }

    #[test]
    fn test_reset_clears_counters() {
        let mut profile = OpcodeProfile::new();
        profile.record(Op::Call, 100);
        profile.reset();
        assert_eq!(profile.total_count(), 0);
    }
}
