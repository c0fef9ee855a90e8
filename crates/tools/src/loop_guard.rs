//! Runaway tool-loop detection.
//!
//! A sliding time window of `(tool, args, timestamp)` records. A loop is
//! declared when any of:
//! - total calls in the window reach `max_calls`
//! - the trailing run of identical-name calls reaches `same_tool_limit`
//! - the last three calls form an A-B-A pattern with identical A
//!   name+arguments

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use tether_domain::config::ToolLoopConfig;

#[derive(Debug, Clone)]
struct CallRecord {
    tool: String,
    args: String,
    at: Instant,
}

/// Why a loop was declared; carries the user-facing message.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopIssue {
    TotalCalls { count: usize, limit: usize },
    ConsecutiveSameTool { tool: String, limit: usize },
    Alternating { tool: String },
}

impl LoopIssue {
    pub fn message(&self) -> String {
        match self {
            LoopIssue::TotalCalls { count, limit } => format!(
                "Tool loop detected: {count} tool calls within the time window (>= {limit})"
            ),
            LoopIssue::ConsecutiveSameTool { tool, limit } => format!(
                "Tool loop detected: Tool '{tool}' consecutive calls exceed limit (>= {limit})"
            ),
            LoopIssue::Alternating { tool } => format!(
                "Tool loop detected: alternating repeat of tool '{tool}' with identical arguments"
            ),
        }
    }
}

/// Snapshot of the current window, computable on demand.
#[derive(Debug, Clone, Default)]
pub struct LoopStats {
    pub total_calls: usize,
    pub distinct_tools: usize,
    pub trailing_same_tool: usize,
}

pub struct LoopDetector {
    cfg: ToolLoopConfig,
    records: Mutex<VecDeque<CallRecord>>,
}

impl LoopDetector {
    pub fn new(cfg: ToolLoopConfig) -> Self {
        Self {
            cfg,
            records: Mutex::new(VecDeque::new()),
        }
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.cfg.time_window_secs)
    }

    fn prune(records: &mut VecDeque<CallRecord>, window: Duration) {
        let now = Instant::now();
        while let Some(front) = records.front() {
            if now.duration_since(front.at) > window {
                records.pop_front();
            } else {
                break;
            }
        }
    }

    /// Check whether executing `tool(args)` now would be a loop.
    /// Consulted before the call is recorded or executed.
    pub fn check(&self, tool: &str, args: &serde_json::Value) -> Option<LoopIssue> {
        let mut records = self.records.lock();
        Self::prune(&mut records, self.window());

        if records.len() >= self.cfg.max_calls {
            return Some(LoopIssue::TotalCalls {
                count: records.len(),
                limit: self.cfg.max_calls,
            });
        }

        let trailing_same = records
            .iter()
            .rev()
            .take_while(|r| r.tool == tool)
            .count();
        if trailing_same >= self.cfg.same_tool_limit {
            return Some(LoopIssue::ConsecutiveSameTool {
                tool: tool.to_string(),
                limit: self.cfg.same_tool_limit,
            });
        }

        // A-B-A: the last three recorded calls alternate around one
        // identical call.
        if records.len() >= 3 {
            let n = records.len();
            let (a1, b, a2) = (&records[n - 3], &records[n - 2], &records[n - 1]);
            if a1.tool == a2.tool
                && a1.args == a2.args
                && (b.tool != a1.tool || b.args != a1.args)
            {
                return Some(LoopIssue::Alternating {
                    tool: a1.tool.clone(),
                });
            }
        }
        let _ = args;

        None
    }

    /// Record an executed call.
    pub fn record(&self, tool: &str, args: &serde_json::Value) {
        let mut records = self.records.lock();
        Self::prune(&mut records, self.window());
        records.push_back(CallRecord {
            tool: tool.to_string(),
            args: args.to_string(),
            at: Instant::now(),
        });
    }

    pub fn stats(&self) -> LoopStats {
        let mut records = self.records.lock();
        Self::prune(&mut records, self.window());

        let total_calls = records.len();
        let mut tools: Vec<&str> = records.iter().map(|r| r.tool.as_str()).collect();
        tools.sort_unstable();
        tools.dedup();
        let trailing_same_tool = records
            .back()
            .map(|last| {
                records
                    .iter()
                    .rev()
                    .take_while(|r| r.tool == last.tool)
                    .count()
            })
            .unwrap_or(0);

        LoopStats {
            total_calls,
            distinct_tools: tools.len(),
            trailing_same_tool,
        }
    }

    /// Forget everything (used on session reset).
    pub fn reset(&self) {
        self.records.lock().clear();
    }
}
