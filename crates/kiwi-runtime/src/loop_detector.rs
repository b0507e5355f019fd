//! Stuck-pattern detection over a sliding window of tool calls.
//!
//! Three patterns, checked in order after each recorded call:
//!
//! - **Exact repeat**: the last `threshold` calls are identical.
//! - **Alternating**: the last four calls form `ABAB` with `A ≠ B`.
//! - **Spiral**: one tool dominates the last five calls (4+ occurrences)
//!   with params that share a key set but never repeat a value set.
//!
//! Params are normalized before comparison: volatile keys (`timestamp`,
//! `session_id`, `request_id`) drop out and path-like values have their
//! separators canonicalized, so retries that differ only in noise still
//! count as repeats.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Instant;

/// Default sliding window length.
pub const DEFAULT_WINDOW_SIZE: usize = 20;
/// Default identical-call threshold for the exact-repeat pattern.
pub const DEFAULT_REPEAT_THRESHOLD: usize = 3;

const VOLATILE_KEYS: &[&str] = &["timestamp", "session_id", "request_id"];
const PATH_KEYS: &[&str] = &["path", "file_path", "filepath"];

/// Which stuck pattern fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    ExactRepeat,
    Alternating,
    Spiral,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::ExactRepeat => "exact_repeat",
            PatternType::Alternating => "alternating",
            PatternType::Spiral => "spiral",
        }
    }
}

/// Signal that a pathological call sequence was detected.
#[derive(Debug, Clone, PartialEq)]
pub struct StuckSignal {
    pub reason: String,
    pub suggestion: String,
    pub pattern_type: PatternType,
    /// The `(tool_id, normalized_params)` tuples involved.
    pub calls_involved: Vec<(String, BTreeMap<String, Value>)>,
}

type Call = (String, BTreeMap<String, Value>);

/// Sliding-window stuck detector. One instance per session.
#[derive(Debug)]
pub struct LoopDetector {
    window_size: usize,
    repeat_threshold: usize,
    history: VecDeque<(Call, Instant)>,
    last_progress: Instant,
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE, DEFAULT_REPEAT_THRESHOLD)
    }
}

impl LoopDetector {
    pub fn new(window_size: usize, repeat_threshold: usize) -> Self {
        Self {
            window_size,
            repeat_threshold,
            history: VecDeque::with_capacity(window_size),
            last_progress: Instant::now(),
        }
    }

    /// Records a call and evaluates the window. The first matching
    /// pattern wins; detection is monotonic in the sense that further
    /// identical calls keep firing until the window drains.
    pub fn record_call(&mut self, tool_id: &str, params: &Value) -> Option<StuckSignal> {
        let call = (tool_id.to_string(), normalize_params(params));

        if self.history.len() == self.window_size {
            self.history.pop_front();
        }
        self.history.push_back((call, Instant::now()));

        let stuck = self
            .check_exact_repeat()
            .or_else(|| self.check_alternating())
            .or_else(|| self.check_spiral());

        if stuck.is_some() {
            return stuck;
        }

        if is_progress_call(tool_id) {
            self.last_progress = Instant::now();
        }
        None
    }

    /// Clears the window and resets the progress marker.
    pub fn reset(&mut self) {
        self.history.clear();
        self.last_progress = Instant::now();
    }

    /// Elapsed time since the last write-indicating call. Exposed for
    /// future wall-clock stall detection; nothing consumes it yet.
    pub fn since_last_progress(&self) -> std::time::Duration {
        self.last_progress.elapsed()
    }

    fn recent(&self, n: usize) -> Vec<&Call> {
        self.history
            .iter()
            .rev()
            .take(n)
            .map(|(call, _)| call)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    fn check_exact_repeat(&self) -> Option<StuckSignal> {
        if self.history.len() < self.repeat_threshold {
            return None;
        }
        let recent = self.recent(self.repeat_threshold);
        let first = recent[0];
        if !recent.iter().all(|call| *call == first) {
            return None;
        }

        let (tool_id, _) = first;
        Some(StuckSignal {
            reason: format!(
                "Tool '{tool_id}' called {} times with identical parameters",
                self.repeat_threshold
            ),
            suggestion:
                "Try different parameters or a different approach. Consider the help tool with action='stuck'"
                    .to_string(),
            pattern_type: PatternType::ExactRepeat,
            calls_involved: recent.into_iter().cloned().collect(),
        })
    }

    fn check_alternating(&self) -> Option<StuckSignal> {
        if self.history.len() < 4 {
            return None;
        }
        let recent = self.recent(4);
        if recent[0] == recent[2] && recent[1] == recent[3] && recent[0] != recent[1] {
            return Some(StuckSignal {
                reason: "Alternating pattern detected: same two operations repeating".to_string(),
                suggestion: "Break the cycle by trying a different tool or approach".to_string(),
                pattern_type: PatternType::Alternating,
                calls_involved: recent.into_iter().cloned().collect(),
            });
        }
        None
    }

    fn check_spiral(&self) -> Option<StuckSignal> {
        if self.history.len() < 4 {
            return None;
        }
        let recent = self.recent(5);

        let mut groups: BTreeMap<&str, Vec<&BTreeMap<String, Value>>> = BTreeMap::new();
        for (tool_id, params) in &recent {
            groups.entry(tool_id.as_str()).or_default().push(params);
        }

        for (tool_id, param_sets) in groups {
            if param_sets.len() < 4 {
                continue;
            }
            if params_similar_but_different(&param_sets) {
                return Some(StuckSignal {
                    reason: format!(
                        "Spiral pattern detected: '{tool_id}' called repeatedly with similar parameters"
                    ),
                    suggestion:
                        "Parameters are converging but not making progress. Try a fundamentally different approach"
                            .to_string(),
                    pattern_type: PatternType::Spiral,
                    calls_involved: recent
                        .iter()
                        .filter(|(id, _)| id.as_str() == tool_id)
                        .map(|(id, p)| (id.clone(), p.clone()))
                        .collect(),
                });
            }
        }
        None
    }
}

/// Same key set across all calls, but no two identical value sets.
fn params_similar_but_different(param_sets: &[&BTreeMap<String, Value>]) -> bool {
    if param_sets.len() < 2 {
        return false;
    }

    let rendered: HashSet<String> = param_sets
        .iter()
        .map(|p| serde_json::to_string(p).unwrap_or_default())
        .collect();
    if rendered.len() != param_sets.len() {
        // Some calls are identical; that is the exact-repeat family.
        return false;
    }

    let key_sets: HashSet<Vec<&String>> = param_sets.iter().map(|p| p.keys().collect()).collect();
    key_sets.len() == 1
}

fn normalize_params(params: &Value) -> BTreeMap<String, Value> {
    let Some(map) = params.as_object() else {
        return BTreeMap::new();
    };

    let mut normalized = BTreeMap::new();
    for (key, value) in map {
        let lower = key.to_lowercase();
        if VOLATILE_KEYS.contains(&lower.as_str()) {
            continue;
        }
        if PATH_KEYS.contains(&lower.as_str()) {
            if let Some(s) = value.as_str() {
                normalized.insert(key.clone(), Value::String(s.replace('\\', "/")));
                continue;
            }
        }
        normalized.insert(key.clone(), value.clone());
    }
    normalized
}

/// Tool ids containing these substrings count as progress.
fn is_progress_call(tool_id: &str) -> bool {
    const PROGRESS: &[&str] = &[
        "write", "edit", "create", "delete", "commit", "push", "install", "build", "test",
        "deploy",
    ];
    let lower = tool_id.to_lowercase();
    PROGRESS.iter().any(|p| lower.contains(p))
}
