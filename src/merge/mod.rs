pub mod table;
pub mod text;

use crate::error::{Result, SyncError};
use serde::Serialize;

pub const START_MARKER: &str = "<<<<<<<";
pub const DIVIDER_MARKER: &str = "=======";
pub const END_MARKER: &str = ">>>>>>>";
pub const LOCAL_LABEL: &str = "local";
pub const REMOTE_LABEL: &str = "remote";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeResult {
    pub merged_content: String,
    pub has_conflicts: bool,
    pub conflict_count: usize,
}

impl MergeResult {
    pub fn clean(content: String) -> Self {
        Self {
            merged_content: content,
            has_conflicts: false,
            conflict_count: 0,
        }
    }

    pub fn conflicted(content: String) -> Self {
        let conflict_count = count_conflicts(&content);
        Self {
            merged_content: content,
            has_conflicts: conflict_count > 0,
            conflict_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Clean(String),
    Conflicted(String),
    NotApplicable,
}

pub trait MergeStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn merge(&self, base: &str, local: &str, remote: &str) -> Result<MergeOutcome>;
}

/// Ordered fallback chain of merge strategies.
///
/// A strategy that cannot handle the input returns `NotApplicable` and the
/// next one runs; the line merge at the end of the default chain always
/// produces an answer.
pub struct MergeEngine {
    strategies: Vec<Box<dyn MergeStrategy>>,
}

impl Default for MergeEngine {
    fn default() -> Self {
        Self::new(vec![
            Box::new(table::TableMerge),
            Box::new(text::LineMerge::default()),
        ])
    }
}

impl MergeEngine {
    pub fn new(strategies: Vec<Box<dyn MergeStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn merge(&self, base: &str, local: &str, remote: &str, document_id: &str) -> Result<MergeResult> {
        // Trivial cases never need a tool
        if local == remote || remote == base {
            return Ok(MergeResult::clean(local.to_string()));
        }
        if local == base {
            return Ok(MergeResult::clean(remote.to_string()));
        }

        let mut last_error = None;
        for strategy in &self.strategies {
            match strategy.merge(base, local, remote) {
                Ok(MergeOutcome::Clean(content)) => {
                    tracing::debug!("{} merged document {} cleanly", strategy.name(), document_id);
                    return Ok(MergeResult::clean(content));
                }
                Ok(MergeOutcome::Conflicted(content)) => {
                    let result = MergeResult::conflicted(content);
                    tracing::debug!(
                        "{} left {} conflict(s) in document {}",
                        strategy.name(),
                        result.conflict_count,
                        document_id
                    );
                    return Ok(result);
                }
                Ok(MergeOutcome::NotApplicable) => {
                    tracing::trace!("{} not applicable to document {}", strategy.name(), document_id);
                }
                Err(e) => {
                    tracing::warn!("{} failed for document {}: {}", strategy.name(), document_id, e);
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(SyncError::MergeTool { message, .. }) => SyncError::MergeTool {
                document_id: document_id.to_string(),
                message,
            },
            Some(other) => SyncError::MergeTool {
                document_id: document_id.to_string(),
                message: other.to_string(),
            },
            None => SyncError::MergeTool {
                document_id: document_id.to_string(),
                message: "no merge strategy applied".to_string(),
            },
        })
    }
}

fn is_start_line(line: &str) -> bool {
    line.strip_prefix(START_MARKER)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
}

fn is_end_line(line: &str) -> bool {
    line.strip_prefix(END_MARKER)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
}

/// Number of conflict regions, counted by start markers.
pub fn count_conflicts(content: &str) -> usize {
    content.lines().filter(|l| is_start_line(l)).count()
}

/// True when `content` still holds an unresolved conflict region.
pub fn has_conflict_markers(content: &str) -> bool {
    let mut open = false;
    for line in content.lines() {
        if is_start_line(line) {
            open = true;
        } else if open && is_end_line(line) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl MergeStrategy for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn merge(&self, _: &str, _: &str, _: &str) -> Result<MergeOutcome> {
            Err(SyncError::MergeTool {
                document_id: String::new(),
                message: "boom".to_string(),
            })
        }
    }

    struct Fixed(&'static str);

    impl MergeStrategy for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn merge(&self, _: &str, _: &str, _: &str) -> Result<MergeOutcome> {
            Ok(MergeOutcome::Clean(self.0.to_string()))
        }
    }

    #[test]
    fn test_marker_detection() {
        let conflicted = "a\n<<<<<<< local\nb\n=======\nc\n>>>>>>> remote\nd\n";
        assert!(has_conflict_markers(conflicted));
        assert_eq!(count_conflicts(conflicted), 1);

        assert!(!has_conflict_markers("a\n======= not a marker\n"));
        assert!(!has_conflict_markers("<<<<<<< local\nnever closed\n"));
        assert!(!has_conflict_markers("<<<<<<<<< too long\n>>>>>>>>> also\n"));
    }

    #[test]
    fn test_trivial_merges_skip_strategies() {
        let engine = MergeEngine::new(vec![Box::new(Failing)]);

        assert_eq!(engine.merge("a", "b", "a", "1").unwrap().merged_content, "b");
        assert_eq!(engine.merge("a", "a", "c", "1").unwrap().merged_content, "c");
        let same = engine.merge("a", "z", "z", "1").unwrap();
        assert_eq!(same.merged_content, "z");
        assert!(!same.has_conflicts);
    }

    #[test]
    fn test_failing_strategy_falls_through() {
        let engine = MergeEngine::new(vec![Box::new(Failing), Box::new(Fixed("ok"))]);
        let result = engine.merge("a", "b", "c", "1").unwrap();
        assert_eq!(result.merged_content, "ok");
    }

    #[test]
    fn test_last_failure_is_merge_tool_error() {
        let engine = MergeEngine::new(vec![Box::new(Failing)]);
        let err = engine.merge("a", "b", "c", "77").unwrap_err();
        match err {
            SyncError::MergeTool { document_id, message } => {
                assert_eq!(document_id, "77");
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_spec_examples() {
        let engine = MergeEngine::default();

        let clean = engine.merge("A\nB\nC", "A2\nB\nC", "A\nB\nC2", "1").unwrap();
        assert!(!clean.has_conflicts);
        assert_eq!(clean.merged_content, "A2\nB\nC2");

        let conflict = engine.merge("X", "Y", "Z", "1").unwrap();
        assert!(conflict.has_conflicts);
        assert_eq!(conflict.conflict_count, 1);
        assert!(conflict.merged_content.contains("<<<<<<< local"));
        assert!(conflict.merged_content.contains("======="));
        assert!(conflict.merged_content.contains(">>>>>>> remote"));
    }
}
