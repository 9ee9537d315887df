//! Per-iteration profilers producing secondary metrics

use crate::allocator::{current_allocation, reset_allocation_counter};
use crate::measure::CpuTimes;
use macrobench_ipc::SecondaryValue;

/// Profilers a run can enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilerKind {
    /// Allocated bytes and allocation count per operation
    Gc,
    /// Deepest stack seen after an invocation
    Stack,
    /// Process CPU time per iteration
    Rusage,
}

impl ProfilerKind {
    /// Accepted profiler identifiers.
    pub const NAMES: [&'static str; 3] = ["gc", "stack", "rusage"];

    /// Parse an identifier.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "gc" => Some(ProfilerKind::Gc),
            "stack" => Some(ProfilerKind::Stack),
            "rusage" => Some(ProfilerKind::Rusage),
            _ => None,
        }
    }
}

/// The enabled profilers and their per-iteration state.
#[derive(Debug, Default)]
pub struct ProfilerSet {
    gc: bool,
    stack: bool,
    rusage: bool,
    max_depth: usize,
    cpu_start: Option<CpuTimes>,
}

impl ProfilerSet {
    /// Enable the named profilers. Unknown names are skipped with a warning.
    pub fn new<S: AsRef<str>>(names: &[S]) -> Self {
        let mut set = Self::default();
        for name in names {
            match ProfilerKind::from_name(name.as_ref()) {
                Some(ProfilerKind::Gc) => set.gc = true,
                Some(ProfilerKind::Stack) => set.stack = true,
                Some(ProfilerKind::Rusage) => set.rusage = true,
                None => tracing::warn!(profiler = name.as_ref(), "ignoring unknown profiler"),
            }
        }
        set
    }

    /// Whether the stack profiler needs a depth after every invocation.
    #[inline(always)]
    pub fn tracks_depth(&self) -> bool {
        self.stack
    }

    /// Called after iteration setup.
    pub fn begin_iteration(&mut self) {
        self.max_depth = 0;
        if self.rusage {
            self.cpu_start = CpuTimes::now();
        }
        if self.gc {
            reset_allocation_counter();
        }
    }

    /// Called after each measured invocation, outside the timed interval.
    #[inline(always)]
    pub fn after_invocation(&mut self, depth: usize) {
        if depth > self.max_depth {
            self.max_depth = depth;
        }
    }

    /// Called before iteration teardown.
    pub fn end_iteration(&mut self, operations: u64) -> Vec<SecondaryValue> {
        let mut out = Vec::new();
        if self.gc {
            let (bytes, count) = current_allocation();
            let ops = operations.max(1) as f64;
            out.push(secondary("·gc.alloc.rate.norm", bytes as f64 / ops, "B/op"));
            out.push(secondary("·gc.count", count as f64 / ops, "allocs/op"));
        }
        if self.stack {
            out.push(secondary("·stack.depth.max", self.max_depth as f64, "values"));
        }
        if self.rusage {
            if let (Some(start), Some(end)) = (self.cpu_start.take(), CpuTimes::now()) {
                out.push(secondary("·cpu.user", end.user_ms - start.user_ms, "ms"));
                out.push(secondary("·cpu.sys", end.sys_ms - start.sys_ms, "ms"));
            }
        }
        out
    }
}

fn secondary(name: &str, value: f64, unit: &str) -> SecondaryValue {
    SecondaryValue {
        name: name.to_string(),
        value,
        unit: unit.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse() {
        for name in ProfilerKind::NAMES {
            assert!(ProfilerKind::from_name(name).is_some());
        }
        assert!(ProfilerKind::from_name("perfasm").is_none());
    }

    #[test]
    fn test_stack_depth_max() {
        let mut set = ProfilerSet::new(&["stack"]);
        assert!(set.tracks_depth());
        set.begin_iteration();
        set.after_invocation(3);
        set.after_invocation(1);
        let out = set.end_iteration(2);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "·stack.depth.max");
        assert_eq!(out[0].value, 3.0);
    }

    #[test]
    fn test_gc_reports_two_metrics() {
        let mut set = ProfilerSet::new(&["gc"]);
        set.begin_iteration();
        let out = set.end_iteration(10);
        let names: Vec<_> = out.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["·gc.alloc.rate.norm", "·gc.count"]);
    }

    #[test]
    fn test_nothing_enabled() {
        let mut set = ProfilerSet::new::<&str>(&[]);
        set.begin_iteration();
        assert!(set.end_iteration(1).is_empty());
    }
}
