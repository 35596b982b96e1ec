//! Client-side breakpoint bookkeeping.
//!
//! DAP replaces a file's breakpoints wholesale on every `setBreakpoints`,
//! so breakpoints are grouped per file and the adapter's answer is applied
//! positionally. Breakpoints stay keyed by the line the user asked for; a
//! line the adapter moved them to is kept alongside.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::protocol::BreakpointResponse;

/// A client-side breakpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Breakpoint {
    /// Source file path.
    pub path: PathBuf,
    /// Requested line number (1-based).
    pub line: i64,
    /// Optional condition expression.
    pub condition: Option<String>,
    /// Optional hit condition expression.
    pub hit_condition: Option<String>,
    /// Optional log message (logpoint).
    pub log_message: Option<String>,
    /// Whether the adapter has verified this breakpoint.
    pub verified: bool,
    /// Adapter-assigned ID.
    pub adapter_id: Option<i64>,
    /// Line the adapter actually bound the breakpoint to.
    pub adapter_line: Option<i64>,
}

impl Breakpoint {
    /// Create a new unverified breakpoint at the given path and line.
    pub fn new(path: PathBuf, line: i64) -> Self {
        Self {
            path,
            line,
            condition: None,
            hit_condition: None,
            log_message: None,
            verified: false,
            adapter_id: None,
            adapter_line: None,
        }
    }

    /// The line the breakpoint is effective on: the adapter's answer if
    /// there is one, the requested line otherwise.
    pub fn effective_line(&self) -> i64 {
        self.adapter_line.unwrap_or(self.line)
    }

    /// Stop only when `condition` evaluates true.
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Stop only when the hit count satisfies `hit_condition`.
    pub fn with_hit_condition(mut self, hit_condition: impl Into<String>) -> Self {
        self.hit_condition = Some(hit_condition.into());
        self
    }

    /// Turn the breakpoint into a logpoint.
    pub fn with_log_message(mut self, msg: impl Into<String>) -> Self {
        self.log_message = Some(msg.into());
        self
    }
}

/// Breakpoints of one session, grouped by file.
#[derive(Debug, Clone, Default)]
pub struct BreakpointManager {
    breakpoints: BTreeMap<PathBuf, Vec<Breakpoint>>,
}

impl BreakpointManager {
    /// An empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a breakpoint. An existing breakpoint on the same line is replaced.
    pub fn add(&mut self, bp: Breakpoint) {
        let list = self.breakpoints.entry(bp.path.clone()).or_default();
        match list.iter_mut().find(|existing| existing.line == bp.line) {
            Some(existing) => *existing = bp,
            None => {
                list.push(bp);
                list.sort_by_key(|b| b.line);
            }
        }
    }

    /// Remove the breakpoint at `path:line`. Returns `true` if one existed.
    pub fn remove(&mut self, path: &Path, line: i64) -> bool {
        let Some(list) = self.breakpoints.get_mut(path) else {
            return false;
        };
        let before = list.len();
        list.retain(|bp| bp.line != line);
        let removed = list.len() != before;
        if list.is_empty() {
            self.breakpoints.remove(path);
        }
        removed
    }

    /// All breakpoints for a file, sorted by line.
    pub fn get_for_file(&self, path: &Path) -> &[Breakpoint] {
        self.breakpoints.get(path).map_or(&[], |v| v.as_slice())
    }

    /// Files that have at least one breakpoint.
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.breakpoints.keys().map(PathBuf::as_path)
    }

    /// Apply a `setBreakpoints` answer for `path`.
    ///
    /// The adapter answers in request order, so the caller must only pass
    /// the answer to the latest request for the file. Entries beyond the
    /// shorter of the two lists are ignored. Requested lines are never
    /// rewritten.
    pub fn apply_response(&mut self, path: &Path, answers: &[BreakpointResponse]) {
        let Some(list) = self.breakpoints.get_mut(path) else {
            return;
        };
        for (bp, answer) in list.iter_mut().zip(answers) {
            bp.verified = answer.verified;
            bp.adapter_id = answer.id;
            bp.adapter_line = answer.line;
        }
    }

    /// Drop every breakpoint in `path`.
    pub fn clear_file(&mut self, path: &Path) {
        self.breakpoints.remove(path);
    }

    /// Iterate over every breakpoint in every file.
    pub fn all(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values().flat_map(|v| v.iter())
    }
}
