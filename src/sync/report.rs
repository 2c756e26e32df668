//! Per-pass summary handed to the logging collaborator and the CLI.

#![allow(missing_docs)]

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// What happened to one font during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EntryAction {
    /// Downloaded for the first time and registered `refs` times.
    Added { refs: u32 },
    /// Replaced with new content; `refs` registrations restored.
    Updated { refs: u32 },
    /// Already matched the advertised digest.
    Unchanged,
    /// File already matched but was not managed; now tracked and registered.
    Adopted,
    /// Orphan removed after releasing `released` registrations.
    Evicted { released: u32 },
    /// Orphan could not be deleted; kept for the next pass.
    EvictionDeferred { error: String },
    /// Download abandoned after `attempts` tries.
    Failed { attempts: u32, error: String },
    /// Entry not processed at all (duplicate or unusable name).
    Skipped { reason: String },
}

/// One line of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryOutcome {
    pub key: String,
    pub path: PathBuf,
    #[serde(flatten)]
    pub action: EntryAction,
}

impl EntryOutcome {
    #[must_use]
    pub fn new(key: impl Into<String>, path: impl Into<PathBuf>, action: EntryAction) -> Self {
        Self {
            key: key.into(),
            path: path.into(),
            action,
        }
    }
}

/// Summary of a sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub outcomes: Vec<EntryOutcome>,
    /// Download calls made, including failed attempts.
    pub downloads_attempted: u32,
    /// Whether a stop request cut retries short.
    pub interrupted: bool,
    pub duration_ms: u64,
}

impl SyncReport {
    fn count(&self, pred: impl Fn(&EntryAction) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.action)).count()
    }

    #[must_use]
    pub fn added(&self) -> usize {
        self.count(|a| matches!(a, EntryAction::Added { .. }))
    }

    #[must_use]
    pub fn updated(&self) -> usize {
        self.count(|a| matches!(a, EntryAction::Updated { .. }))
    }

    #[must_use]
    pub fn evicted(&self) -> usize {
        self.count(|a| matches!(a, EntryAction::Evicted { .. }))
    }

    #[must_use]
    pub fn eviction_deferred(&self) -> usize {
        self.count(|a| matches!(a, EntryAction::EvictionDeferred { .. }))
    }

    /// Entries that could not be brought in sync this pass.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|a| matches!(a, EntryAction::Failed { .. } | EntryAction::Skipped { .. }))
    }

    #[must_use]
    pub fn unchanged(&self) -> usize {
        self.count(|a| matches!(a, EntryAction::Unchanged | EntryAction::Adopted))
    }

    /// Whether the pass changed anything on disk.
    #[must_use]
    pub fn changed_anything(&self) -> bool {
        self.added() + self.updated() + self.evicted() > 0
    }

    #[must_use]
    pub fn outcome(&self, key: &str) -> Option<&EntryOutcome> {
        self.outcomes.iter().find(|o| o.key == key)
    }

    /// Human-readable per-entry lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .map(|o| {
                let path = o.path.display();
                match &o.action {
                    EntryAction::Added { .. } => format!("Added {path}"),
                    EntryAction::Updated { .. } => format!("Updated {path}"),
                    EntryAction::Unchanged => format!("Font {path} was already up to date"),
                    EntryAction::Adopted => format!("Font {path} was already present, now managed"),
                    EntryAction::Evicted { .. } => format!("Deleted local font {path}"),
                    EntryAction::EvictionDeferred { error } => {
                        format!("Could not delete {path}: {error}")
                    }
                    EntryAction::Failed { attempts, error } => {
                        format!("Failed {path} after {attempts} attempt(s): {error}")
                    }
                    EntryAction::Skipped { reason } => format!("Skipped {}: {reason}", o.key),
                }
            })
            .collect()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "added={} updated={} evicted={} failed={} unchanged={}",
            self.added(),
            self.updated(),
            self.evicted(),
            self.failed(),
            self.unchanged()
        )?;
        if self.eviction_deferred() > 0 {
            write!(f, " eviction_deferred={}", self.eviction_deferred())?;
        }
        if self.interrupted {
            f.write_str(" interrupted")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> SyncReport {
        SyncReport {
            outcomes: vec![
                EntryOutcome::new("A.ttf", "/f/A.ttf", EntryAction::Added { refs: 1 }),
                EntryOutcome::new("B.ttf", "/f/B.ttf", EntryAction::Unchanged),
                EntryOutcome::new("C.ttf", "/f/C.ttf", EntryAction::Evicted { released: 2 }),
                EntryOutcome::new(
                    "D.ttf",
                    "/f/D.ttf",
                    EntryAction::Failed {
                        attempts: 3,
                        error: "503".to_string(),
                    },
                ),
            ],
            downloads_attempted: 4,
            interrupted: false,
            duration_ms: 12,
        }
    }

    #[test]
    fn counts_and_display() {
        let r = report();
        assert_eq!(r.added(), 1);
        assert_eq!(r.failed(), 1);
        assert!(r.changed_anything());
        assert_eq!(
            r.to_string(),
            "added=1 updated=0 evicted=1 failed=1 unchanged=1"
        );
    }

    #[test]
    fn lines_describe_each_entry() {
        let lines = report().lines();
        assert_eq!(lines[1], "Font /f/B.ttf was already up to date");
        assert!(lines[3].contains("after 3 attempt(s)"));
    }

    #[test]
    fn serializes_with_flattened_action() {
        let json = serde_json::to_value(report()).unwrap();
        assert_eq!(json["outcomes"][2]["action"], "evicted");
        assert_eq!(json["outcomes"][2]["released"], 2);
        assert_eq!(json["downloads_attempted"], 4);
    }

    #[test]
    fn empty_report_changes_nothing() {
        let r = SyncReport::default();
        assert!(!r.changed_anything());
        assert!(r.outcome("A.ttf").is_none());
    }
}
