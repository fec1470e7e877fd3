#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use schema_assign_core::{
    clean_id, namespace_boundary, AssignmentPattern, IdentityResolver, NoopIdentityResolver,
    PageChange, PatternRow,
};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const ASSIGN_MIGRATION_VERSION: i64 = 1;

const SCHEMA_ASSIGN_V1: &str = r"
CREATE TABLE IF NOT EXISTS schema_assignments_patterns (
  pattern TEXT NOT NULL,
  tbl TEXT NOT NULL,
  PRIMARY KEY (pattern, tbl)
);

CREATE TABLE IF NOT EXISTS schema_assignments (
  pid TEXT NOT NULL,
  tbl TEXT NOT NULL,
  assigned INTEGER NOT NULL DEFAULT 0 CHECK (assigned IN (0, 1)),
  PRIMARY KEY (pid, tbl)
);

CREATE INDEX IF NOT EXISTS idx_schema_assignments_tbl_assigned
  ON schema_assignments(tbl, assigned);
";

/// SQLite persistence for the pattern and assignment relations.
///
/// Assignment rows are soft-deleted only: normal rule churn flips the
/// `assigned` flag and never removes a row, so "was this schema ever attached
/// to this page" stays answerable.
pub struct SqliteAssignmentStore {
    conn: Connection,
}

impl SqliteAssignmentStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_ASSIGN_V1)
            .context("failed to apply assignment schema")?;

        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![ASSIGN_MIGRATION_VERSION, now_rfc3339()?],
            )
            .context("failed to register assignment schema migration")?;

        Ok(())
    }

    pub fn upsert_pattern(&self, pattern: &str, schema: &str) -> Result<()> {
        self.conn
            .execute(
                "REPLACE INTO schema_assignments_patterns (pattern, tbl) VALUES (?1, ?2)",
                params![pattern, schema],
            )
            .context("failed to upsert assignment pattern")?;
        Ok(())
    }

    /// Deletes one pattern row. Returns false when no row matched; a missing
    /// row is not an error because rule deletion is idempotent.
    pub fn delete_pattern(&self, pattern: &str, schema: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM schema_assignments_patterns WHERE pattern = ?1 AND tbl = ?2",
                params![pattern, schema],
            )
            .context("failed to delete assignment pattern")?;
        Ok(affected > 0)
    }

    pub fn delete_all_patterns(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM schema_assignments_patterns", [])
            .context("failed to delete assignment patterns")?;
        Ok(())
    }

    pub fn list_patterns(&self) -> Result<Vec<PatternRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT pattern, tbl FROM schema_assignments_patterns ORDER BY pattern, tbl",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(PatternRow {
                pattern: row.get(0)?,
                schema: row.get(1)?,
            })
        })?;

        collect_rows(rows)
    }

    pub fn set_assigned(&self, pid: &str, schema: &str, assigned: bool) -> Result<()> {
        self.conn
            .execute(
                "REPLACE INTO schema_assignments (pid, tbl, assigned) VALUES (?1, ?2, ?3)",
                params![pid, schema, i64::from(assigned)],
            )
            .with_context(|| format!("failed to record assignment for page {pid}"))?;
        Ok(())
    }

    /// Schemas currently recorded as assigned to the page.
    pub fn recorded_schemas(&self, pid: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT tbl FROM schema_assignments WHERE pid = ?1 AND assigned = 1 ORDER BY tbl",
        )?;
        let rows = stmt.query_map(params![pid], |row| row.get(0))?;
        collect_rows(rows)
    }

    /// Every recorded row for the page with its flag, assigned or not.
    /// Reconciliation diffs against this to compute flag transitions.
    pub fn recorded_flags(&self, pid: &str) -> Result<Vec<(String, bool)>> {
        let mut stmt = self.conn.prepare(
            "SELECT tbl, assigned FROM schema_assignments WHERE pid = ?1 ORDER BY tbl",
        )?;
        let rows = stmt.query_map(params![pid], |row| {
            let schema: String = row.get(0)?;
            let assigned: i64 = row.get(1)?;
            Ok((schema, assigned != 0))
        })?;
        collect_rows(rows)
    }

    /// Candidate pages for pattern-addition propagation: every known page not
    /// currently assigned to the schema. Pages already assigned are excluded
    /// because an addition can only ever widen the matched set.
    pub fn pages_not_assigned_to(&self, schema: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT pid FROM schema_assignments
             WHERE pid NOT IN (
                SELECT pid FROM schema_assignments WHERE tbl = ?1 AND assigned = 1
             )
             ORDER BY pid",
        )?;
        let rows = stmt.query_map(params![schema], |row| row.get(0))?;
        collect_rows(rows)
    }

    /// Candidate pages for pattern-removal propagation: every page currently
    /// assigned to the schema. A removal can only ever shrink the matched set.
    pub fn pages_assigned_to(&self, schema: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT pid FROM schema_assignments
             WHERE tbl = ?1 AND assigned = 1
             ORDER BY pid",
        )?;
        let rows = stmt.query_map(params![schema], |row| row.get(0))?;
        collect_rows(rows)
    }

    /// All known pages and their per-schema flags, optionally filtered.
    pub fn pages(
        &self,
        schema: Option<&str>,
        assigned_only: bool,
    ) -> Result<BTreeMap<String, BTreeMap<String, bool>>> {
        let mut sql =
            "SELECT pid, tbl, assigned FROM schema_assignments WHERE 1=1".to_string();
        if schema.is_some() {
            sql.push_str(" AND tbl = ?1");
        }
        if assigned_only {
            sql.push_str(" AND assigned = 1");
        }
        sql.push_str(" ORDER BY pid, tbl");

        let mut stmt = self.conn.prepare(&sql)?;
        let map_row = |row: &rusqlite::Row<'_>| {
            let pid: String = row.get(0)?;
            let tbl: String = row.get(1)?;
            let assigned: i64 = row.get(2)?;
            Ok((pid, tbl, assigned != 0))
        };
        let rows = match schema {
            Some(value) => stmt.query_map(params![value], map_row)?,
            None => stmt.query_map([], map_row)?,
        };

        let mut result: BTreeMap<String, BTreeMap<String, bool>> = BTreeMap::new();
        for row in rows {
            let (pid, tbl, assigned) = row.context("failed to read assignment row")?;
            result.entry(pid).or_default().insert(tbl, assigned);
        }
        Ok(result)
    }

    pub fn unassign_all(&self) -> Result<()> {
        self.conn
            .execute("UPDATE schema_assignments SET assigned = 0", [])
            .context("failed to unassign all pages")?;
        Ok(())
    }

    /// Destructive: drops every assignment row, including history. Intended
    /// for test/reset paths only.
    pub fn delete_all_assignments(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM schema_assignments", [])
            .context("failed to delete assignment rows")?;
        Ok(())
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Outcome of removing a pattern: whether a stored row was actually deleted
/// plus the per-page flag transitions caused by the removal.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Eq, PartialEq)]
pub struct RemovePatternOutcome {
    pub removed: bool,
    pub changes: Vec<PageChange>,
}

/// Orchestrates the pattern store, the assignment store, and the matcher.
///
/// One engine is constructed per unit of work; the pattern cache is loaded at
/// construction and reloaded after every rule mutation. Writes are idempotent
/// upserts keyed on (pid, tbl), so concurrent writers can race without
/// producing duplicates or partial corruption, only a stale read until the
/// next reconciliation.
pub struct AssignmentEngine {
    store: SqliteAssignmentStore,
    resolver: Box<dyn IdentityResolver>,
    patterns: Vec<AssignmentPattern>,
}

impl AssignmentEngine {
    pub fn new(store: SqliteAssignmentStore) -> Result<Self> {
        Self::with_resolver(store, Box::new(NoopIdentityResolver))
    }

    pub fn with_resolver(
        store: SqliteAssignmentStore,
        resolver: Box<dyn IdentityResolver>,
    ) -> Result<Self> {
        let mut engine = Self {
            store,
            resolver,
            patterns: Vec::new(),
        };
        engine.reload_patterns()?;
        Ok(engine)
    }

    /// Rebuilds the in-memory pattern cache from storage.
    pub fn reload_patterns(&mut self) -> Result<()> {
        let rows = self.store.list_patterns()?;
        let mut patterns = Vec::with_capacity(rows.len());
        for row in rows {
            let parsed = AssignmentPattern::parse(&row.pattern, &row.schema)
                .map_err(|err| anyhow!("stored pattern {} is invalid: {err}", row.pattern))?;
            patterns.push(parsed);
        }
        self.patterns = patterns;
        Ok(())
    }

    /// Persists a new rule and propagates it to every page it now matches.
    ///
    /// Only pages not currently assigned to the schema are scanned: an
    /// addition can never remove a match, so already-assigned pages are left
    /// untouched. Returns the pages that transitioned to assigned.
    pub fn add_pattern(&mut self, pattern: &str, schema: &str) -> Result<Vec<PageChange>> {
        let parsed = AssignmentPattern::parse(pattern, schema)
            .map_err(|err| anyhow!("pattern rejected: {err}"))?;

        self.store.upsert_pattern(parsed.raw(), parsed.schema())?;
        self.reload_patterns()?;

        let mut changes = Vec::new();
        for pid in self.store.pages_not_assigned_to(parsed.schema())? {
            if self.live_schemas(&pid).contains(parsed.schema()) {
                self.store.set_assigned(&pid, parsed.schema(), true)?;
                changes.push(PageChange {
                    pid,
                    schema: parsed.schema().to_string(),
                    assigned: true,
                });
            }
        }

        tracing::info!(
            pattern = parsed.raw(),
            schema = parsed.schema(),
            assigned_pages = changes.len(),
            "assignment pattern added"
        );
        Ok(changes)
    }

    /// Deletes a rule and unassigns every page no remaining pattern matches.
    ///
    /// Only pages currently assigned to the schema are scanned: a removal can
    /// never add a match. Deleting an absent rule is a benign no-op reported
    /// through `removed`. Assignment rows are flipped, never deleted.
    pub fn remove_pattern(&mut self, pattern: &str, schema: &str) -> Result<RemovePatternOutcome> {
        let removed = self.store.delete_pattern(pattern.trim(), schema.trim())?;
        self.reload_patterns()?;

        let mut changes = Vec::new();
        for pid in self.store.pages_assigned_to(schema.trim())? {
            if !self.live_schemas(&pid).contains(schema.trim()) {
                self.store.set_assigned(&pid, schema.trim(), false)?;
                changes.push(PageChange {
                    pid,
                    schema: schema.trim().to_string(),
                    assigned: false,
                });
            }
        }

        tracing::info!(
            pattern = pattern.trim(),
            schema = schema.trim(),
            removed,
            unassigned_pages = changes.len(),
            "assignment pattern removed"
        );
        Ok(RemovePatternOutcome { removed, changes })
    }

    /// Reconciles one page's recorded rows against the current patterns.
    ///
    /// Every recorded row is flipped to its live membership; live schemas
    /// with no recorded row yet get a fresh assigned row. Returns only actual
    /// flag transitions, so boundary layers can invalidate caches per changed
    /// schema.
    pub fn reevaluate_page(&mut self, pid: &str) -> Result<Vec<PageChange>> {
        let pid = self.canonical_pid(pid);
        self.reload_patterns()?;

        let live = self.live_schemas(&pid);
        let mut changes = Vec::new();
        let mut seen = BTreeSet::new();

        for (schema, was_assigned) in self.store.recorded_flags(&pid)? {
            let now_assigned = live.contains(&schema);
            self.store.set_assigned(&pid, &schema, now_assigned)?;
            if was_assigned != now_assigned {
                changes.push(PageChange {
                    pid: pid.clone(),
                    schema: schema.clone(),
                    assigned: now_assigned,
                });
            }
            seen.insert(schema);
        }

        for schema in &live {
            if !seen.contains(schema) {
                self.store.set_assigned(&pid, schema, true)?;
                changes.push(PageChange {
                    pid: pid.clone(),
                    schema: schema.clone(),
                    assigned: true,
                });
            }
        }

        tracing::debug!(pid = pid.as_str(), transitions = changes.len(), "page reconciled");
        Ok(changes)
    }

    /// The schemas applying to a page: evaluated live against the current
    /// patterns, or read back from the recorded assignment rows.
    ///
    /// Never fails on unknown pages; an unassigned page yields an empty set.
    pub fn page_schemas(&self, pid: &str, live: bool) -> Result<BTreeSet<String>> {
        let pid = self.canonical_pid(pid);
        if live {
            return Ok(self.live_schemas(&pid));
        }
        Ok(self.store.recorded_schemas(&pid)?.into_iter().collect())
    }

    /// The cached rule table, ordered by pattern text.
    #[must_use]
    pub fn all_patterns(&self) -> Vec<PatternRow> {
        self.patterns
            .iter()
            .map(|pattern| PatternRow {
                pattern: pattern.raw().to_string(),
                schema: pattern.schema().to_string(),
            })
            .collect()
    }

    pub fn pages(
        &self,
        schema: Option<&str>,
        assigned_only: bool,
    ) -> Result<BTreeMap<String, BTreeMap<String, bool>>> {
        self.store.pages(schema, assigned_only)
    }

    /// Drops every pattern. With `full` the assignment rows are deleted too;
    /// otherwise every flag is flipped to unassigned and history is kept.
    pub fn clear(&mut self, full: bool) -> Result<()> {
        self.store.delete_all_patterns()?;
        if full {
            self.store.delete_all_assignments()?;
        } else {
            self.store.unassign_all()?;
        }
        tracing::info!(full, "assignment tables cleared");
        self.reload_patterns()
    }

    fn canonical_pid(&self, pid: &str) -> String {
        clean_id(&self.resolver.canonicalize(pid))
    }

    fn live_schemas(&self, pid: &str) -> BTreeSet<String> {
        let boundary = namespace_boundary(pid);
        self.patterns
            .iter()
            .filter(|pattern| pattern.matches(pid, Some(&boundary)))
            .map(|pattern| pattern.schema().to_string())
            .collect()
    }
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("failed to format migration timestamp")
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut items = Vec::new();
    for row in rows {
        items.push(row.context("failed to read sqlite row")?);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::too_many_lines)]

    use super::*;
    use proptest::prelude::*;
    use schema_assign_core::LanguagePrefixResolver;

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    fn fixture_store() -> SqliteAssignmentStore {
        let store = must(SqliteAssignmentStore::open(Path::new(":memory:")));
        must(store.migrate());
        store
    }

    fn fixture_engine() -> AssignmentEngine {
        must(AssignmentEngine::new(fixture_store()))
    }

    fn recorded_flag(engine: &AssignmentEngine, pid: &str, schema: &str) -> Option<bool> {
        let flags = must(engine.store.recorded_flags(pid));
        flags
            .into_iter()
            .find(|(tbl, _)| tbl == schema)
            .map(|(_, assigned)| assigned)
    }

    fn live_set(engine: &AssignmentEngine, pid: &str) -> BTreeSet<String> {
        must(engine.page_schemas(pid, true))
    }

    fn recorded_set(engine: &AssignmentEngine, pid: &str) -> BTreeSet<String> {
        must(engine.page_schemas(pid, false))
    }

    #[test]
    fn migrate_is_idempotent() {
        let store = fixture_store();
        must(store.migrate());
        must(store.upsert_pattern("ns:**", "wiki"));
        must(store.migrate());
        assert_eq!(must(store.list_patterns()).len(), 1);
    }

    #[test]
    fn pattern_listing_is_ordered_and_replaces_on_conflict() {
        let store = fixture_store();
        must(store.upsert_pattern("b:**", "wiki"));
        must(store.upsert_pattern("a:**", "wiki"));
        must(store.upsert_pattern("a:**", "wiki"));

        let rows = must(store.list_patterns());
        assert_eq!(
            rows,
            vec![
                PatternRow {
                    pattern: "a:**".to_string(),
                    schema: "wiki".to_string()
                },
                PatternRow {
                    pattern: "b:**".to_string(),
                    schema: "wiki".to_string()
                },
            ]
        );
    }

    #[test]
    fn delete_pattern_reports_missing_rows_as_benign() {
        let store = fixture_store();
        assert!(!must(store.delete_pattern("ns:**", "wiki")));
        must(store.upsert_pattern("ns:**", "wiki"));
        assert!(must(store.delete_pattern("ns:**", "wiki")));
    }

    #[test]
    fn add_pattern_rejects_malformed_regex_before_any_write() {
        let mut engine = fixture_engine();
        let err = match engine.add_pattern("/[unclosed/", "wiki") {
            Ok(_) => panic!("expected malformed regex to be rejected"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("pattern rejected"));
        assert!(must(engine.store.list_patterns()).is_empty());
    }

    #[test]
    fn reevaluate_creates_rows_for_newly_matched_schemas() {
        let mut engine = fixture_engine();
        let _ = must(engine.add_pattern("a:**", "wiki"));

        let changes = must(engine.reevaluate_page("a:b:c"));
        assert_eq!(
            changes,
            vec![PageChange {
                pid: "a:b:c".to_string(),
                schema: "wiki".to_string(),
                assigned: true,
            }]
        );
        assert_eq!(recorded_flag(&engine, "a:b:c", "wiki"), Some(true));
    }

    #[test]
    fn reevaluate_makes_recorded_equal_live() {
        let mut engine = fixture_engine();
        let _ = must(engine.add_pattern("a:**", "wiki"));
        let _ = must(engine.add_pattern("a:b:*", "notes"));
        let _ = must(engine.reevaluate_page("a:b:c"));

        assert_eq!(live_set(&engine, "a:b:c"), recorded_set(&engine, "a:b:c"));
    }

    #[test]
    fn reevaluate_is_idempotent_without_rule_changes() {
        let mut engine = fixture_engine();
        let _ = must(engine.add_pattern("a:**", "wiki"));
        let first = must(engine.reevaluate_page("a:b:c"));
        assert!(!first.is_empty());

        let second = must(engine.reevaluate_page("a:b:c"));
        assert!(second.is_empty());
    }

    #[test]
    fn removing_pattern_flips_flag_but_keeps_row() {
        let mut engine = fixture_engine();
        let _ = must(engine.add_pattern("a:**", "wiki"));
        let _ = must(engine.reevaluate_page("a:b:c"));

        let outcome = must(engine.remove_pattern("a:**", "wiki"));
        assert!(outcome.removed);
        assert_eq!(
            outcome.changes,
            vec![PageChange {
                pid: "a:b:c".to_string(),
                schema: "wiki".to_string(),
                assigned: false,
            }]
        );

        // Row survives as history; only the flag changed.
        assert_eq!(recorded_flag(&engine, "a:b:c", "wiki"), Some(false));
        assert!(live_set(&engine, "a:b:c").is_empty());
        assert!(recorded_set(&engine, "a:b:c").is_empty());
    }

    #[test]
    fn removing_missing_pattern_is_a_no_op() {
        let mut engine = fixture_engine();
        let outcome = must(engine.remove_pattern("ns:**", "wiki"));
        assert!(!outcome.removed);
        assert!(outcome.changes.is_empty());
    }

    #[test]
    fn pattern_addition_assigns_only_previously_unassigned_pages() {
        let mut engine = fixture_engine();
        let _ = must(engine.add_pattern("a:b:*", "wiki"));
        let _ = must(engine.add_pattern("a:x:*", "notes"));
        let _ = must(engine.reevaluate_page("a:b:c"));
        let _ = must(engine.reevaluate_page("a:x:y"));
        assert_eq!(recorded_flag(&engine, "a:b:c", "wiki"), Some(true));
        assert_eq!(recorded_flag(&engine, "a:x:y", "wiki"), None);

        // Widening to the whole subtree picks up the unassigned page only;
        // a:b:c is already assigned and must not be rewritten or reported.
        let changes = must(engine.add_pattern("a:**", "wiki"));
        assert_eq!(
            changes,
            vec![PageChange {
                pid: "a:x:y".to_string(),
                schema: "wiki".to_string(),
                assigned: true,
            }]
        );
        assert_eq!(recorded_flag(&engine, "a:b:c", "wiki"), Some(true));
        assert_eq!(recorded_flag(&engine, "a:x:y", "wiki"), Some(true));
    }

    #[test]
    fn pattern_addition_does_not_discover_never_seen_pages() {
        // Propagation scans only pages already present in the assignment
        // table; a page with no row at all is picked up on its next save.
        let mut engine = fixture_engine();
        let changes = must(engine.add_pattern("a:**", "wiki"));
        assert!(changes.is_empty());

        let changes = must(engine.reevaluate_page("a:fresh"));
        assert_eq!(changes.len(), 1);
        assert_eq!(recorded_flag(&engine, "a:fresh", "wiki"), Some(true));
    }

    #[test]
    fn pattern_removal_keeps_pages_still_matched_by_other_rules() {
        let mut engine = fixture_engine();
        let _ = must(engine.add_pattern("a:**", "wiki"));
        let _ = must(engine.add_pattern("a:b:*", "wiki"));
        let _ = must(engine.reevaluate_page("a:b:c"));

        let outcome = must(engine.remove_pattern("a:b:*", "wiki"));
        assert!(outcome.removed);
        assert!(outcome.changes.is_empty());
        assert_eq!(recorded_flag(&engine, "a:b:c", "wiki"), Some(true));

        let outcome = must(engine.remove_pattern("a:**", "wiki"));
        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(recorded_flag(&engine, "a:b:c", "wiki"), Some(false));
    }

    #[test]
    fn scenario_subtree_pattern_lifecycle() {
        let mut engine = fixture_engine();
        let _ = must(engine.add_pattern("a:**", "wiki"));

        let mut expected = BTreeSet::new();
        expected.insert("wiki".to_string());
        assert_eq!(live_set(&engine, "a:b:c"), expected);

        let _ = must(engine.reevaluate_page("a:b:c"));
        let _ = must(engine.remove_pattern("a:**", "wiki"));

        assert!(live_set(&engine, "a:b:c").is_empty());
        assert!(recorded_set(&engine, "a:b:c").is_empty());
        assert_eq!(recorded_flag(&engine, "a:b:c", "wiki"), Some(false));
    }

    #[test]
    fn clear_without_full_keeps_unassigned_rows() {
        let mut engine = fixture_engine();
        let _ = must(engine.add_pattern("a:**", "wiki"));
        let _ = must(engine.reevaluate_page("a:b:c"));

        must(engine.clear(false));
        assert!(engine.all_patterns().is_empty());
        assert_eq!(recorded_flag(&engine, "a:b:c", "wiki"), Some(false));
    }

    #[test]
    fn clear_full_drops_assignment_rows() {
        let mut engine = fixture_engine();
        let _ = must(engine.add_pattern("a:**", "wiki"));
        let _ = must(engine.reevaluate_page("a:b:c"));

        must(engine.clear(true));
        assert!(engine.all_patterns().is_empty());
        assert_eq!(recorded_flag(&engine, "a:b:c", "wiki"), None);
        assert!(must(engine.pages(None, false)).is_empty());
    }

    #[test]
    fn pages_listing_supports_schema_and_assigned_filters() {
        let mut engine = fixture_engine();
        let _ = must(engine.add_pattern("a:**", "wiki"));
        let _ = must(engine.add_pattern("b:**", "notes"));
        let _ = must(engine.reevaluate_page("a:p"));
        let _ = must(engine.reevaluate_page("b:p"));
        let _ = must(engine.remove_pattern("b:**", "notes"));

        let all = must(engine.pages(None, false));
        assert_eq!(all.len(), 2);
        assert!(all["a:p"]["wiki"]);
        assert!(!all["b:p"]["notes"]);

        let assigned = must(engine.pages(None, true));
        assert_eq!(assigned.len(), 1);
        assert!(assigned.contains_key("a:p"));

        let notes_only = must(engine.pages(Some("notes"), false));
        assert_eq!(notes_only.len(), 1);
        assert!(notes_only.contains_key("b:p"));
    }

    #[test]
    fn fresh_engine_sees_persisted_patterns() {
        let db_path = std::env::temp_dir().join(format!(
            "schema-assign-reload-{}.sqlite3",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&db_path);

        {
            let store = must(SqliteAssignmentStore::open(&db_path));
            must(store.migrate());
            let mut engine = must(AssignmentEngine::new(store));
            let _ = must(engine.add_pattern("a:**", "wiki"));
        }

        let store = must(SqliteAssignmentStore::open(&db_path));
        let engine = must(AssignmentEngine::new(store));
        assert_eq!(engine.all_patterns().len(), 1);
        assert!(live_set(&engine, "a:b").contains("wiki"));

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn translated_page_ids_share_one_assignment_record() {
        let store = fixture_store();
        let resolver = LanguagePrefixResolver::new(vec!["en".to_string(), "de".to_string()]);
        let mut engine = must(AssignmentEngine::with_resolver(store, Box::new(resolver)));

        let _ = must(engine.add_pattern("wiki:**", "projects"));
        let _ = must(engine.reevaluate_page("en:wiki:start"));
        let _ = must(engine.reevaluate_page("de:wiki:start"));

        let pages = must(engine.pages(None, false));
        assert_eq!(pages.len(), 1);
        assert!(pages.contains_key("wiki:start"));
        assert!(recorded_set(&engine, "en:Wiki:Start").contains("projects"));
    }

    #[test]
    fn page_ids_are_cleaned_before_keying() {
        let mut engine = fixture_engine();
        let _ = must(engine.add_pattern("wiki:**", "projects"));
        let _ = must(engine.reevaluate_page("Wiki/Start Page"));
        assert_eq!(
            recorded_flag(&engine, "wiki:start_page", "projects"),
            Some(true)
        );
    }

    fn arb_page() -> impl Strategy<Value = String> {
        prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "d"]), 1..4)
            .prop_map(|segments| segments.join(":"))
    }

    fn arb_pattern() -> impl Strategy<Value = String> {
        let namespaces = prop::collection::vec(prop::sample::select(vec!["a", "b", "c"]), 0..3)
            .prop_map(|segments| segments.join(":"));
        (namespaces, 0u8..4).prop_map(|(ns, shape)| match shape {
            0 => "**".to_string(),
            1 if ns.is_empty() => "*".to_string(),
            1 => format!("{ns}:**"),
            2 if ns.is_empty() => "*".to_string(),
            2 => format!("{ns}:*"),
            _ if ns.is_empty() => "a".to_string(),
            _ => format!("{ns}:page"),
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_reconcile_converges_and_is_idempotent(
            patterns in prop::collection::vec((arb_pattern(), prop::sample::select(vec!["wiki", "notes"])), 0..6),
            pages in prop::collection::vec(arb_page(), 1..8),
        ) {
            let mut engine = fixture_engine();
            for (pattern, schema) in patterns {
                let _ = must(engine.add_pattern(&pattern, schema));
            }

            for page in &pages {
                let _ = must(engine.reevaluate_page(page));
                prop_assert_eq!(live_set(&engine, page), recorded_set(&engine, page));

                let second = must(engine.reevaluate_page(page));
                prop_assert!(second.is_empty());
            }
        }

        #[test]
        fn prop_removal_never_deletes_rows(
            pages in prop::collection::vec(arb_page(), 1..6),
        ) {
            let mut engine = fixture_engine();
            let _ = must(engine.add_pattern("**", "wiki"));
            for page in &pages {
                let _ = must(engine.reevaluate_page(page));
            }
            let rows_before = must(engine.pages(None, false)).len();

            let _ = must(engine.remove_pattern("**", "wiki"));
            let after = must(engine.pages(None, false));
            prop_assert_eq!(after.len(), rows_before);
            for flags in after.values() {
                prop_assert_eq!(flags.get("wiki"), Some(&false));
            }
        }
    }
}
