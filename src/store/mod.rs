// src/store/mod.rs
// Durable persistence for competitors, sources, articles, events, and the
// classification cache, on a single-file SQLite database. The connection sits
// behind one mutex: single-writer discipline is the documented scaling limit
// of this storage layer.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::classify::{Classification, EventCategory, ImpactLevel};
use crate::config::{CompetitorConfig, SourceKind};
use crate::error::StoreError;

/// Events below this confidence never persist, whatever the classifier's
/// configured gate says.
pub const EVENT_CONFIDENCE_FLOOR: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    Pending,
    Classified,
    Failed,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Pending => "pending",
            ArticleStatus::Classified => "classified",
            ArticleStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(ArticleStatus::Pending),
            "classified" => Ok(ArticleStatus::Classified),
            "failed" => Ok(ArticleStatus::Failed),
            other => Err(StoreError::Validation(format!(
                "unknown article status in db: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredCompetitor {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub vertical: String,
}

#[derive(Debug, Clone)]
pub struct SourceRow {
    pub id: i64,
    pub competitor_id: i64,
    pub competitor_name: String,
    pub kind: SourceKind,
    pub endpoint: String,
    pub selector: Option<String>,
    pub last_fetched: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct NewArticle<'a> {
    pub source_id: i64,
    pub title: &'a str,
    pub body: &'a str,
    pub url: &'a str,
    pub published_at: Option<DateTime<Utc>>,
    pub fingerprint: &'a str,
}

/// Outcome of the atomic check-and-insert. A fingerprint collision is a
/// normal idempotent outcome, not an error.
#[derive(Debug, Clone, Copy)]
pub struct ArticleInsert {
    pub inserted: bool,
    pub id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredArticle {
    pub id: i64,
    pub source_id: i64,
    pub competitor: String,
    pub title: String,
    pub body: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub fingerprint: String,
    pub status: ArticleStatus,
}

#[derive(Debug)]
pub struct NewEvent<'a> {
    pub article_id: i64,
    pub category: EventCategory,
    pub confidence: f64,
    pub impact: ImpactLevel,
    pub entities: &'a [String],
    pub summary: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub id: i64,
    pub article_id: i64,
    pub competitor: String,
    pub title: String,
    pub url: String,
    pub category: EventCategory,
    pub confidence: f64,
    pub impact: ImpactLevel,
    pub entities: Vec<String>,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub competitor: Option<String>,
    pub category: Option<EventCategory>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventStats {
    pub total_events: i64,
    pub by_category: BTreeMap<String, i64>,
}

#[derive(Debug, Clone)]
pub struct CachedClassification {
    pub classification: Classification,
    pub cached_at: DateTime<Utc>,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Idempotent upsert of the loaded configuration document. Competitors
    /// are immutable once created; sources absent from the document are
    /// deactivated rather than deleted.
    pub fn sync_config(&self, cfg: &CompetitorConfig) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;

        tx.execute("UPDATE sources SET active = 0", [])?;

        for c in &cfg.competitors {
            let slug = c.slug();
            tx.execute(
                "INSERT INTO competitors (name, slug, vertical, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(slug) DO NOTHING",
                params![c.name, slug, c.vertical, now_rfc3339()],
            )?;
            let competitor_id: i64 = tx.query_row(
                "SELECT id FROM competitors WHERE slug = ?1",
                params![slug],
                |row| row.get(0),
            )?;

            for s in &c.sources {
                tx.execute(
                    "INSERT INTO sources (competitor_id, kind, endpoint, selector, active)
                     VALUES (?1, ?2, ?3, ?4, 1)
                     ON CONFLICT(endpoint) DO UPDATE SET
                         competitor_id = excluded.competitor_id,
                         kind = excluded.kind,
                         selector = excluded.selector,
                         active = 1",
                    params![competitor_id, s.kind.as_str(), s.endpoint, s.selector],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn list_competitors(&self) -> Result<Vec<StoredCompetitor>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt =
            conn.prepare("SELECT id, name, slug, vertical FROM competitors ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(StoredCompetitor {
                id: row.get(0)?,
                name: row.get(1)?,
                slug: row.get(2)?,
                vertical: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_active_sources(&self) -> Result<Vec<SourceRow>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT s.id, s.competitor_id, c.name, s.kind, s.endpoint, s.selector, s.last_fetched
             FROM sources s
             JOIN competitors c ON s.competitor_id = c.id
             WHERE s.active = 1
             ORDER BY s.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, competitor_id, competitor_name, kind, endpoint, selector, last_fetched) =
                row?;
            out.push(SourceRow {
                id,
                competitor_id,
                competitor_name,
                kind: parse_kind(&kind)?,
                endpoint,
                selector,
                last_fetched: last_fetched.as_deref().and_then(parse_rfc3339),
            });
        }
        Ok(out)
    }

    pub fn touch_source_fetched(&self, source_id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "UPDATE sources SET last_fetched = ?1 WHERE id = ?2",
            params![now_rfc3339(), source_id],
        )?;
        Ok(())
    }

    /// Atomic check-and-insert keyed on fingerprint uniqueness. Returns
    /// `inserted = false` without error when the fingerprint already exists.
    pub fn insert_article_if_new(&self, a: &NewArticle) -> Result<ArticleInsert, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let changed = conn.execute(
            "INSERT OR IGNORE INTO articles
                 (source_id, title, body, url, published_at, fingerprint, status, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)",
            params![
                a.source_id,
                a.title,
                a.body,
                a.url,
                a.published_at.map(|t| t.to_rfc3339()),
                a.fingerprint,
                now_rfc3339(),
            ],
        )?;

        if changed == 1 {
            Ok(ArticleInsert {
                inserted: true,
                id: conn.last_insert_rowid(),
            })
        } else {
            let id: i64 = conn.query_row(
                "SELECT id FROM articles WHERE fingerprint = ?1",
                params![a.fingerprint],
                |row| row.get(0),
            )?;
            Ok(ArticleInsert {
                inserted: false,
                id,
            })
        }
    }

    /// Oldest-first batch of articles awaiting classification.
    /// `include_failed` is the retry switch for terminally-failed articles.
    pub fn list_unclassified_articles(
        &self,
        limit: usize,
        include_failed: bool,
    ) -> Result<Vec<StoredArticle>, StoreError> {
        let statuses = if include_failed {
            "('pending', 'failed')"
        } else {
            "('pending')"
        };
        let sql = format!(
            "SELECT a.id, a.source_id, c.name, a.title, a.body, a.url,
                    a.published_at, a.fingerprint, a.status
             FROM articles a
             JOIN sources s ON a.source_id = s.id
             JOIN competitors c ON s.competitor_id = c.id
             WHERE a.status IN {statuses}
             ORDER BY a.fetched_at ASC, a.id ASC
             LIMIT ?1"
        );

        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], map_article_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?.finish()?);
        }
        Ok(out)
    }

    /// Persist one classified event and mark the parent article classified,
    /// in a single transaction. Rejects contract violations: the confidence
    /// floor and the non-actionable category are enforced here as a last line.
    pub fn insert_event(&self, ev: &NewEvent) -> Result<i64, StoreError> {
        if !ev.confidence.is_finite() || !(0.0..=1.0).contains(&ev.confidence) {
            return Err(StoreError::Validation(format!(
                "confidence out of range: {}",
                ev.confidence
            )));
        }
        if ev.confidence < EVENT_CONFIDENCE_FLOOR {
            return Err(StoreError::Validation(format!(
                "confidence {} below floor {EVENT_CONFIDENCE_FLOOR}",
                ev.confidence
            )));
        }
        if ev.category == EventCategory::Other {
            return Err(StoreError::Validation(
                "category 'other' is not persistable".to_string(),
            ));
        }

        let entities_json = serde_json::to_string(ev.entities)
            .map_err(|e| StoreError::Validation(format!("entities not serializable: {e}")))?;

        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        // An article yields at most one event; a repeat insert (cache-hit
        // replay) is an idempotent no-op returning the existing row.
        let changed = tx.execute(
            "INSERT OR IGNORE INTO events
                 (article_id, category, confidence, impact, entities, summary, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                ev.article_id,
                ev.category.as_str(),
                ev.confidence,
                ev.impact.as_str(),
                entities_json,
                ev.summary,
                now_rfc3339(),
            ],
        )?;
        let event_id = if changed == 1 {
            tx.last_insert_rowid()
        } else {
            tx.query_row(
                "SELECT id FROM events WHERE article_id = ?1",
                params![ev.article_id],
                |row| row.get(0),
            )?
        };
        tx.execute(
            "UPDATE articles SET status = 'classified' WHERE id = ?1",
            params![ev.article_id],
        )?;
        tx.commit()?;
        Ok(event_id)
    }

    /// Classified with no event: below the gate, or non-actionable content.
    pub fn mark_article_classified(&self, article_id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "UPDATE articles SET status = 'classified', failure_reason = NULL WHERE id = ?1",
            params![article_id],
        )?;
        Ok(())
    }

    /// Terminal failure state, distinct from pending, so a failed article is
    /// not retried on every run.
    pub fn mark_article_classification_failed(
        &self,
        article_id: i64,
        reason: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "UPDATE articles SET status = 'failed', failure_reason = ?1 WHERE id = ?2",
            params![reason, article_id],
        )?;
        Ok(())
    }

    pub fn cache_get(&self, fingerprint: &str) -> Result<Option<CachedClassification>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT payload, cached_at FROM classification_cache WHERE fingerprint = ?1",
                params![fingerprint],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((payload, cached_at)) = row else {
            return Ok(None);
        };
        match serde_json::from_str::<Classification>(&payload) {
            Ok(classification) => Ok(Some(CachedClassification {
                classification,
                cached_at: parse_rfc3339(&cached_at).unwrap_or_else(Utc::now),
            })),
            Err(e) => {
                // Corrupt entry is treated as a miss; the article will simply
                // be classified again.
                tracing::warn!(error = ?e, fingerprint, "unreadable cache payload");
                Ok(None)
            }
        }
    }

    /// Write-once: a second put for the same fingerprint is a no-op.
    pub fn cache_put(
        &self,
        fingerprint: &str,
        classification: &Classification,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(classification)
            .map_err(|e| StoreError::Validation(format!("payload not serializable: {e}")))?;
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT OR IGNORE INTO classification_cache (fingerprint, payload, cached_at)
             VALUES (?1, ?2, ?3)",
            params![fingerprint, payload, now_rfc3339()],
        )?;
        Ok(())
    }

    /// Reporting read used by the dashboard boundary: events with article and
    /// competitor context, newest first, optionally filtered.
    pub fn query_events(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, StoreError> {
        let mut sql = String::from(
            "SELECT e.id, e.article_id, c.name, a.title, a.url,
                    e.category, e.confidence, e.impact, e.entities, e.summary, e.created_at
             FROM events e
             JOIN articles a ON e.article_id = a.id
             JOIN sources s ON a.source_id = s.id
             JOIN competitors c ON s.competitor_id = c.id
             WHERE 1 = 1",
        );
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(slug) = &filter.competitor {
            sql.push_str(" AND c.slug = ?");
            args.push(Box::new(slug.clone()));
        }
        if let Some(cat) = filter.category {
            sql.push_str(" AND e.category = ?");
            args.push(Box::new(cat.as_str().to_string()));
        }
        if let Some(from) = filter.from {
            sql.push_str(" AND e.created_at >= ?");
            args.push(Box::new(from.to_rfc3339()));
        }
        if let Some(to) = filter.to {
            sql.push_str(" AND e.created_at <= ?");
            args.push(Box::new(to.to_rfc3339()));
        }
        sql.push_str(" ORDER BY e.created_at DESC, e.id DESC LIMIT ?");
        args.push(Box::new(filter.limit.unwrap_or(100) as i64));

        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, f64>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, String>(10)?,
                ))
            },
        )?;

        let mut out = Vec::new();
        for row in rows {
            let (
                id,
                article_id,
                competitor,
                title,
                url,
                category,
                confidence,
                impact,
                entities,
                summary,
                created_at,
            ) = row?;
            out.push(EventRecord {
                id,
                article_id,
                competitor,
                title,
                url,
                category: EventCategory::parse(&category)
                    .ok_or_else(|| StoreError::Validation(format!("bad category in db: {category}")))?,
                confidence,
                impact: ImpactLevel::parse(&impact)
                    .ok_or_else(|| StoreError::Validation(format!("bad impact in db: {impact}")))?,
                entities: serde_json::from_str(&entities).unwrap_or_default(),
                summary,
                created_at: parse_rfc3339(&created_at)
                    .ok_or_else(|| StoreError::Validation(format!("bad timestamp in db: {created_at}")))?,
            });
        }
        Ok(out)
    }

    pub fn event_stats(&self) -> Result<EventStats, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;

        let mut stmt =
            conn.prepare("SELECT category, COUNT(*) FROM events GROUP BY category")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut by_category = BTreeMap::new();
        for row in rows {
            let (cat, count) = row?;
            by_category.insert(cat, count);
        }
        Ok(EventStats {
            total_events: total,
            by_category,
        })
    }

    /// Recent articles for one competitor, newest first.
    pub fn recent_articles(
        &self,
        competitor_slug: &str,
        limit: usize,
    ) -> Result<Vec<StoredArticle>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT a.id, a.source_id, c.name, a.title, a.body, a.url,
                    a.published_at, a.fingerprint, a.status
             FROM articles a
             JOIN sources s ON a.source_id = s.id
             JOIN competitors c ON s.competitor_id = c.id
             WHERE c.slug = ?1
             ORDER BY a.fetched_at DESC, a.id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![competitor_slug, limit as i64], map_article_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?.finish()?);
        }
        Ok(out)
    }
}

// Intermediate row shape: defers status/date parsing out of the rusqlite
// closure so those failures surface as StoreError, not rusqlite errors.
struct ArticleRowRaw {
    id: i64,
    source_id: i64,
    competitor: String,
    title: String,
    body: String,
    url: String,
    published_at: Option<String>,
    fingerprint: String,
    status: String,
}

impl ArticleRowRaw {
    fn finish(self) -> Result<StoredArticle, StoreError> {
        Ok(StoredArticle {
            id: self.id,
            source_id: self.source_id,
            competitor: self.competitor,
            title: self.title,
            body: self.body,
            url: self.url,
            published_at: self.published_at.as_deref().and_then(parse_rfc3339),
            fingerprint: self.fingerprint,
            status: ArticleStatus::parse(&self.status)?,
        })
    }
}

fn map_article_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ArticleRowRaw> {
    Ok(ArticleRowRaw {
        id: row.get(0)?,
        source_id: row.get(1)?,
        competitor: row.get(2)?,
        title: row.get(3)?,
        body: row.get(4)?,
        url: row.get(5)?,
        published_at: row.get(6)?,
        fingerprint: row.get(7)?,
        status: row.get(8)?,
    })
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS competitors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            slug TEXT NOT NULL UNIQUE,
            vertical TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            competitor_id INTEGER NOT NULL REFERENCES competitors(id),
            kind TEXT NOT NULL CHECK (kind IN ('rss', 'html')),
            endpoint TEXT NOT NULL UNIQUE,
            selector TEXT,
            last_fetched TEXT,
            active INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS articles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER NOT NULL REFERENCES sources(id),
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            url TEXT NOT NULL,
            published_at TEXT,
            fingerprint TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'classified', 'failed')),
            failure_reason TEXT,
            fetched_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            article_id INTEGER NOT NULL UNIQUE REFERENCES articles(id),
            category TEXT NOT NULL
                CHECK (category IN ('feature_launch', 'pricing_change', 'partnership')),
            confidence REAL NOT NULL,
            impact TEXT NOT NULL CHECK (impact IN ('high', 'medium', 'low')),
            entities TEXT NOT NULL,
            summary TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS classification_cache (
            fingerprint TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            cached_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_articles_status ON articles(status);
        CREATE INDEX IF NOT EXISTS idx_events_category ON events(category);
        CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at);
        CREATE INDEX IF NOT EXISTS idx_sources_competitor ON sources(competitor_id);",
    )?;
    Ok(())
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn parse_kind(s: &str) -> Result<SourceKind, StoreError> {
    match s {
        "rss" => Ok(SourceKind::Rss),
        "html" => Ok(SourceKind::Html),
        other => Err(StoreError::Validation(format!(
            "unknown source kind in db: {other}"
        ))),
    }
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
