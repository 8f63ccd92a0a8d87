//! Request ledger: the persisted set of item ids the agent already acted on.
//!
//! The ledger is a newline-delimited file with one fullname per line. It is
//! loaded lazily on first access, and every mutation is flushed straight back
//! to disk unless a transaction is open. Transactions snapshot the set on
//! entry; a rollback restores that snapshot and persists it, so a failed
//! scope loses everything it added. Only the outermost transaction writes.

use crate::ItemId;
use crate::error::LedgerError;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Persisted idempotency store. One instance per process owns the file.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    dry: bool,
    ids: Option<HashSet<ItemId>>,
    transactions: Vec<HashSet<ItemId>>,
}

impl Ledger {
    /// Create a ledger backed by `path`. Nothing is read until first use.
    ///
    /// In dry mode the file is still read but never written.
    pub fn new(path: impl Into<PathBuf>, dry: bool) -> Self {
        Self {
            path: path.into(),
            dry,
            ids: None,
            transactions: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_dry(&self) -> bool {
        self.dry
    }

    /// Number of currently open transactions.
    pub fn depth(&self) -> usize {
        self.transactions.len()
    }

    /// Whether the id (raw key or platform item) was already processed.
    pub fn contains(&mut self, id: impl Into<ItemId>) -> Result<bool, LedgerError> {
        let id = id.into();
        tracing::trace!(item_id = %id, "querying ledger");
        Ok(self.loaded()?.contains(&id))
    }

    /// Record an id as processed. Returns whether it was newly inserted.
    /// Flushes only when the set actually changed.
    pub fn add(&mut self, id: impl Into<ItemId>) -> Result<bool, LedgerError> {
        let id = id.into();
        tracing::debug!(item_id = %id, "adding to ledger");
        let inserted = self.loaded()?.insert(id);
        if inserted {
            self.flush()?;
        }
        Ok(inserted)
    }

    pub fn len(&mut self) -> Result<usize, LedgerError> {
        Ok(self.loaded()?.len())
    }

    pub fn is_empty(&mut self) -> Result<bool, LedgerError> {
        Ok(self.loaded()?.is_empty())
    }

    /// Iterate over every recorded id. Order is unspecified.
    pub fn iter(&mut self) -> Result<impl Iterator<Item = &ItemId>, LedgerError> {
        Ok(self.loaded()?.iter())
    }

    /// Rewrite the backing file with the full set.
    ///
    /// No-op in dry mode or when the ledger was never loaded.
    pub fn save(&self) -> Result<(), LedgerError> {
        let Some(ids) = &self.ids else {
            return Ok(());
        };
        if self.dry {
            return Ok(());
        }

        tracing::info!(path = %self.path.display(), count = ids.len(), "saving ledger");

        let mut lines: Vec<&str> = ids.iter().map(ItemId::as_str).collect();
        lines.sort_unstable();
        let mut contents = String::with_capacity(lines.iter().map(|line| line.len() + 1).sum());
        for line in lines {
            contents.push_str(line);
            contents.push('\n');
        }

        std::fs::write(&self.path, contents).map_err(|source| LedgerError::Write {
            path: self.path.display().to_string(),
            source,
        })
    }

    /// Open a transaction scope, snapshotting the current set.
    pub fn begin(&mut self) -> Result<(), LedgerError> {
        let snapshot = self.loaded()?.clone();
        self.transactions.push(snapshot);
        Ok(())
    }

    /// Close the innermost scope keeping its changes.
    pub fn commit(&mut self) -> Result<(), LedgerError> {
        self.transactions.pop().ok_or(LedgerError::NoTransaction)?;
        self.flush()
    }

    /// Close the innermost scope, restoring and persisting its entry snapshot.
    pub fn rollback(&mut self) -> Result<(), LedgerError> {
        let snapshot = self
            .transactions
            .pop()
            .ok_or(LedgerError::NoTransaction)?;
        tracing::warn!(depth = self.transactions.len(), "rolling back ledger transaction");
        self.ids = Some(snapshot);
        self.flush()
    }

    /// Run `scope` inside a transaction: commit on `Ok`, roll back on `Err`.
    pub fn transaction<T, E>(
        &mut self,
        scope: impl FnOnce(&mut Self) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<LedgerError>,
    {
        self.begin()?;
        match scope(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(error) => {
                self.rollback()?;
                Err(error)
            }
        }
    }

    /// Save unless a transaction defers it.
    fn flush(&mut self) -> Result<(), LedgerError> {
        if self.transactions.is_empty() {
            self.save()
        } else {
            Ok(())
        }
    }

    fn loaded(&mut self) -> Result<&mut HashSet<ItemId>, LedgerError> {
        if self.ids.is_none() {
            self.ids = Some(load(&self.path)?);
        }
        Ok(self.ids.get_or_insert_with(HashSet::new))
    }
}

fn load(path: &Path) -> Result<HashSet<ItemId>, LedgerError> {
    tracing::info!(path = %path.display(), "loading ledger");

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no ledger file yet, starting empty");
            return Ok(HashSet::new());
        }
        Err(source) => {
            return Err(LedgerError::Read {
                path: path.display().to_string(),
                source,
            });
        }
    };

    let mut ids = HashSet::new();
    for line in contents.lines() {
        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }
        let id = ItemId::parse(raw);
        if id.as_str() != raw {
            tracing::debug!(legacy = raw, canonical = %id, "converting ledger entry");
        }
        ids.insert(id);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_lines(path: &Path) -> Vec<String> {
        let mut lines: Vec<String> = std::fs::read_to_string(path)
            .expect("ledger file should exist")
            .lines()
            .map(str::to_string)
            .collect();
        lines.sort();
        lines
    }

    fn ledger_in(dir: &tempfile::TempDir) -> Ledger {
        Ledger::new(dir.path().join("CHECKED_COMMENTS.txt"), false)
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ledger_in(&dir);
        assert_eq!(ledger.len().unwrap(), 0);
        assert!(!ledger.contains("t1_abc123").unwrap());
    }

    #[test]
    fn add_inserts_new_ids_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ledger_in(&dir);

        assert!(ledger.add("t1_abc123").unwrap());
        assert!(!ledger.add("t1_abc123").unwrap(), "second add is a no-op");
        assert!(ledger.contains("t1_abc123").unwrap());
        assert_eq!(read_lines(ledger.path()), ["t1_abc123"]);
    }

    #[test]
    fn round_trip_preserves_the_set() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ledger_in(&dir);
        for id in ["t1_aaa", "t3_bbb", "t4_ccc"] {
            ledger.add(id).unwrap();
        }

        let mut reloaded = ledger_in(&dir);
        let mut ids: Vec<String> = reloaded
            .iter()
            .unwrap()
            .map(|id| id.as_str().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, ["t1_aaa", "t3_bbb", "t4_ccc"]);
    }

    #[test]
    fn legacy_entries_migrate_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CHECKED_COMMENTS.txt");
        std::fs::write(&path, "SUBMISSION_xyz789\nt3_xyz789\nabc123\n\nt1_def456\n").unwrap();

        let mut ledger = Ledger::new(&path, false);
        assert_eq!(ledger.len().unwrap(), 3);
        assert!(ledger.contains("t3_xyz789").unwrap());
        assert!(ledger.contains("t1_abc123").unwrap());
        assert!(ledger.contains("SUBMISSION_xyz789").unwrap());
        assert!(ledger.contains("abc123").unwrap());

        ledger.save().unwrap();
        assert_eq!(read_lines(&path), ["t1_abc123", "t1_def456", "t3_xyz789"]);
    }

    #[test]
    fn contains_accepts_platform_items() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ledger_in(&dir);
        let comment = crate::Comment {
            id: "abc123".into(),
            ..Default::default()
        };
        ledger.add(&comment).unwrap();
        assert!(ledger.contains("t1_abc123").unwrap());
        assert!(ledger.contains(&crate::Item::Comment(comment)).unwrap());
    }

    #[test]
    fn dry_mode_reads_but_never_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CHECKED_COMMENTS.txt");
        std::fs::write(&path, "t1_existing\n").unwrap();

        let mut ledger = Ledger::new(&path, true);
        assert!(ledger.contains("t1_existing").unwrap());
        ledger.add("t1_new").unwrap();
        ledger.save().unwrap();
        assert_eq!(read_lines(&path), ["t1_existing"]);
    }

    #[test]
    fn save_before_load_does_not_touch_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(&dir);
        ledger.save().unwrap();
        assert!(!ledger.path().exists());
    }

    #[test]
    fn read_errors_other_than_missing_propagate() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be read as a file.
        let mut ledger = Ledger::new(dir.path(), false);
        let error = ledger.contains("t1_abc").unwrap_err();
        assert!(matches!(error, LedgerError::Read { .. }));
    }

    #[test]
    fn transaction_commit_persists_additions() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ledger_in(&dir);
        ledger.add("t1_initial").unwrap();

        ledger
            .transaction(|ledger| ledger.add("t1_added").map(|_| ()))
            .unwrap();

        assert_eq!(read_lines(ledger.path()), ["t1_added", "t1_initial"]);
    }

    #[test]
    fn transaction_failure_rolls_back_and_persists_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ledger_in(&dir);
        ledger.add("t1_initial").unwrap();

        let result: Result<(), crate::Error> = ledger.transaction(|ledger| {
            ledger.add("t1_doomed")?;
            Err(crate::Error::Other(anyhow::anyhow!("dispatch blew up")))
        });

        assert!(result.is_err());
        assert!(!ledger.contains("t1_doomed").unwrap());
        assert_eq!(read_lines(ledger.path()), ["t1_initial"]);
    }

    #[test]
    fn saves_are_deferred_while_a_transaction_is_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ledger_in(&dir);
        ledger.add("t1_initial").unwrap();

        ledger.begin().unwrap();
        ledger.add("t1_pending").unwrap();
        assert_eq!(read_lines(ledger.path()), ["t1_initial"]);

        ledger.commit().unwrap();
        assert_eq!(read_lines(ledger.path()), ["t1_initial", "t1_pending"]);
    }

    #[test]
    fn only_the_outermost_transaction_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ledger_in(&dir);
        ledger.add("t1_initial").unwrap();

        ledger.begin().unwrap();
        ledger.begin().unwrap();
        ledger.add("t1_inner").unwrap();
        ledger.commit().unwrap();
        assert_eq!(read_lines(ledger.path()), ["t1_initial"]);
        assert_eq!(ledger.depth(), 1);

        // The outer failure discards the inner commit as well.
        ledger.rollback().unwrap();
        assert!(!ledger.contains("t1_inner").unwrap());
        assert_eq!(read_lines(ledger.path()), ["t1_initial"]);
    }

    #[test]
    fn inner_rollback_keeps_outer_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ledger_in(&dir);

        ledger.begin().unwrap();
        ledger.add("t1_outer").unwrap();
        ledger.begin().unwrap();
        ledger.add("t1_inner").unwrap();
        ledger.rollback().unwrap();
        ledger.commit().unwrap();

        assert_eq!(read_lines(ledger.path()), ["t1_outer"]);
    }

    #[test]
    fn closing_without_open_transaction_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = ledger_in(&dir);
        assert!(matches!(ledger.commit(), Err(LedgerError::NoTransaction)));
        assert!(matches!(ledger.rollback(), Err(LedgerError::NoTransaction)));
    }
}
