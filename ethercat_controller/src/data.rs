use std::collections::HashMap;

/// Per-cycle multi-slave command container keyed by configured slave name.
///
/// `seq` and `stamp_ns` are assigned by the cyclic loop when the command is
/// picked up; values set by the application are ignored.
#[derive(Debug, Clone)]
pub struct SystemCommand<C> {
    pub by_slave: HashMap<String, C>,
    pub seq: u64,
    pub stamp_ns: u64,
}

impl<C> Default for SystemCommand<C> {
    fn default() -> Self {
        SystemCommand {
            by_slave: HashMap::new(),
            seq: 0,
            stamp_ns: 0,
        }
    }
}

impl<C> SystemCommand<C> {
    pub fn with(mut self, slave: &str, command: C) -> Self {
        self.by_slave.insert(slave.to_string(), command);
        self
    }
}

/// Per-cycle multi-slave status container keyed by configured slave name.
#[derive(Debug, Clone)]
pub struct SystemStatus<S> {
    pub by_slave: HashMap<String, S>,
    pub seq: u64,
    pub stamp_ns: u64,
}

impl<S> Default for SystemStatus<S> {
    fn default() -> Self {
        SystemStatus {
            by_slave: HashMap::new(),
            seq: 0,
            stamp_ns: 0,
        }
    }
}

/// Cumulative loop counters, updated once per cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycle_count: u64,
    pub last_wkc: u16,
    pub last_cycle_time_ns: u64,
    pub last_deviation_ns: i64,
}
