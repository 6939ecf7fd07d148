//! SQLite state mirror
//!
//! Tables (see `/sql/`):
//! - `profiles` - lazily refreshed account cache
//! - `posts`, `follows`, `blocks`, `likes`, `reposts` - UPSERT / DELETE by uri
//! - `licks` - INSERT OR IGNORE (write-once repost ledger)
//! - `derived_data` - INSERT OR REPLACE (whole-snapshot rollups)
//! - `sub_state` - monotonic stream cursor
//!
//! Every write is keyed, so the stream consumer and the scheduled jobs can
//! share one connection without read-modify-write transactions. The only
//! exception is the histogram merge, which runs in an IMMEDIATE transaction.

use super::classifier::OpsByType;
use super::rollups::merge_buckets;
use super::types::{
    Collection, DerivedData, Entity, GraphEdge, HistogramBucket, Interaction, LanguageScore,
    Lick, Post, Profile, RankedAccount, TopPoster,
};
use crate::sqlite_pragma::apply_optimized_pragmas;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Embedded schema, executed in order at open
const MIGRATIONS: &[(&str, &str)] = &[
    ("00_profiles.sql", include_str!("../../sql/00_profiles.sql")),
    ("01_posts.sql", include_str!("../../sql/01_posts.sql")),
    ("02_graph_edges.sql", include_str!("../../sql/02_graph_edges.sql")),
    ("03_interactions.sql", include_str!("../../sql/03_interactions.sql")),
    ("04_licks.sql", include_str!("../../sql/04_licks.sql")),
    ("05_derived_data.sql", include_str!("../../sql/05_derived_data.sql")),
    ("06_sub_state.sql", include_str!("../../sql/06_sub_state.sql")),
];

const POST_COLUMNS: &str = "uri, cid, author, reply_parent, reply_root, quote_uri, languages, \
                            has_images, text_length, comments, reposts, likes, indexed_at";

#[derive(Debug)]
pub enum StoreError {
    Database(rusqlite::Error),
    Serialization(serde_json::Error),
    /// Cursor write lower than the stored value
    CursorRegression {
        service: String,
        current: i64,
        attempted: i64,
    },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Serialization(e) => write!(f, "Serialization error: {}", e),
            StoreError::CursorRegression {
                service,
                current,
                attempted,
            } => write!(
                f,
                "Cursor regression for {}: stored {}, attempted {}",
                service, current, attempted
            ),
        }
    }
}

impl std::error::Error for StoreError {}

/// Row counts written by one `apply_ops` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub upserts: usize,
    pub deletes: usize,
}

/// Shared handle to the mirror database
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at `db_path` and run the schema.
    pub fn open(db_path: &str) -> Result<Self, StoreError> {
        let mut conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;
        run_schema_migrations(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // --- stream writes ------------------------------------------------------

    /// Persist one batch of classified operations in a single transaction.
    ///
    /// Every author of a created row gets a stub profile (INSERT OR IGNORE).
    /// Re-applying the same batch leaves the mirror unchanged apart from
    /// `indexed_at`.
    pub fn apply_ops(&self, ops: &OpsByType, indexed_at: i64) -> Result<ApplyStats, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut stats = ApplyStats::default();

        for author in ops.authors() {
            ensure_profile(&tx, &author, indexed_at)?;
        }

        for post in &ops.posts.creates {
            put_post(&tx, post)?;
            stats.upserts += 1;
        }
        for edge in &ops.follows.creates {
            put_edge(&tx, Entity::Follows, edge)?;
            stats.upserts += 1;
        }
        for edge in &ops.blocks.creates {
            put_edge(&tx, Entity::Blocks, edge)?;
            stats.upserts += 1;
        }
        for like in &ops.likes.creates {
            put_interaction(&tx, Entity::Likes, like)?;
            stats.upserts += 1;
        }
        for repost in &ops.reposts.creates {
            put_interaction(&tx, Entity::Reposts, repost)?;
            stats.upserts += 1;
        }

        let deletes = [
            (Entity::Posts, &ops.posts.deletes),
            (Entity::Follows, &ops.follows.deletes),
            (Entity::Blocks, &ops.blocks.deletes),
            (Entity::Likes, &ops.likes.deletes),
            (Entity::Reposts, &ops.reposts.deletes),
        ];
        for (entity, uris) in deletes {
            for uri in uris {
                stats.deletes += delete_uri(&tx, entity, uri)?;
            }
        }

        tx.commit()?;
        Ok(stats)
    }

    pub fn upsert_post(&self, post: &Post) -> Result<(), StoreError> {
        put_post(&self.lock(), post)
    }

    pub fn upsert_follow(&self, edge: &GraphEdge) -> Result<(), StoreError> {
        put_edge(&self.lock(), Entity::Follows, edge)
    }

    pub fn upsert_block(&self, edge: &GraphEdge) -> Result<(), StoreError> {
        put_edge(&self.lock(), Entity::Blocks, edge)
    }

    pub fn upsert_like(&self, like: &Interaction) -> Result<(), StoreError> {
        put_interaction(&self.lock(), Entity::Likes, like)
    }

    pub fn upsert_repost(&self, repost: &Interaction) -> Result<(), StoreError> {
        put_interaction(&self.lock(), Entity::Reposts, repost)
    }

    /// Delete a record by uri. Unknown uris are a no-op; returns whether a
    /// row was removed.
    pub fn delete_record(&self, collection: Collection, uri: &str) -> Result<bool, StoreError> {
        Ok(delete_uri(&self.lock(), collection.entity(), uri)? > 0)
    }

    pub fn get_post(&self, uri: &str) -> Result<Option<Post>, StoreError> {
        let conn = self.lock();
        let sql = format!("SELECT {} FROM posts WHERE uri = ?1", POST_COLUMNS);
        Ok(conn.query_row(&sql, [uri], read_post).optional()?)
    }

    /// Row count of one mirror table
    pub fn count(&self, entity: Entity) -> Result<i64, StoreError> {
        let conn = self.lock();
        let sql = format!("SELECT COUNT(*) FROM {}", entity.table());
        Ok(conn.query_row(&sql, [], |row| row.get(0))?)
    }

    // --- cursor -------------------------------------------------------------

    pub fn get_cursor(&self, service: &str) -> Result<Option<i64>, StoreError> {
        let conn = self.lock();
        Ok(conn
            .query_row(
                "SELECT cursor FROM sub_state WHERE service = ?1",
                [service],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Advance the cursor. A value lower than the stored one is rejected
    /// with `CursorRegression` and leaves the row untouched.
    pub fn set_cursor(&self, service: &str, cursor: i64) -> Result<(), StoreError> {
        let conn = self.lock();
        let changed = conn.execute(
            "INSERT INTO sub_state (service, cursor) VALUES (?1, ?2)
             ON CONFLICT(service) DO UPDATE SET cursor = excluded.cursor
             WHERE excluded.cursor >= sub_state.cursor",
            params![service, cursor],
        )?;

        if changed == 0 {
            let current: i64 = conn.query_row(
                "SELECT cursor FROM sub_state WHERE service = ?1",
                [service],
                |row| row.get(0),
            )?;
            return Err(StoreError::CursorRegression {
                service: service.to_string(),
                current,
                attempted: cursor,
            });
        }
        Ok(())
    }

    // --- profiles -----------------------------------------------------------

    pub fn ensure_profile(&self, did: &str, now: i64) -> Result<(), StoreError> {
        ensure_profile(&self.lock(), did, now)
    }

    /// Upsert a refreshed profile; the first-seen `indexed_at` is kept.
    pub fn save_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO profiles (did, handle, display_name, avatar, description, indexed_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(did) DO UPDATE SET
                handle = excluded.handle,
                display_name = excluded.display_name,
                avatar = excluded.avatar,
                description = excluded.description,
                updated_at = excluded.updated_at",
            params![
                profile.did,
                profile.handle,
                profile.display_name,
                profile.avatar,
                profile.description,
                profile.indexed_at,
                profile.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Mark `did` as refreshed without touching its cached fields
    pub fn touch_profile(&self, did: &str, now: i64) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO profiles (did, indexed_at, updated_at) VALUES (?1, ?2, ?2)
             ON CONFLICT(did) DO UPDATE SET updated_at = excluded.updated_at",
            params![did, now],
        )?;
        Ok(())
    }

    /// Record a handle change announced on the stream
    pub fn set_handle(&self, did: &str, handle: &str, now: i64) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO profiles (did, handle, indexed_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(did) DO UPDATE SET handle = excluded.handle",
            params![did, handle, now],
        )?;
        Ok(())
    }

    /// Look a profile up by account id, exact handle, or `<name>.<default_domain>`.
    /// An account-id match wins over a handle match.
    pub fn find_profile(
        &self,
        identifier: &str,
        default_domain: &str,
    ) -> Result<Option<Profile>, StoreError> {
        let identifier = identifier.trim().trim_start_matches('@');
        let qualified = format!("{}.{}", identifier, default_domain);

        let conn = self.lock();
        Ok(conn
            .query_row(
                "SELECT did, handle, display_name, avatar, description, indexed_at, updated_at
                 FROM profiles
                 WHERE did = ?1 OR handle = ?1 OR handle = ?2
                 ORDER BY (did = ?1) DESC
                 LIMIT 1",
                params![identifier, qualified],
                read_profile,
            )
            .optional()?)
    }

    /// Accounts among `dids` whose profile was never refreshed (or is not
    /// cached at all), at most `limit`, in input order.
    pub fn profiles_needing_refresh(
        &self,
        dids: &[String],
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT j.value FROM json_each(?1) j
             WHERE j.value NOT IN (SELECT did FROM profiles WHERE updated_at IS NOT NULL)
             ORDER BY j.key
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![serde_json::to_string(dids)?, limit as i64], |row| {
            row.get::<_, String>(0)
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Known handles for `dids`
    pub fn handles_for(&self, dids: &[String]) -> Result<HashMap<String, String>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT did, handle FROM profiles
             WHERE handle IS NOT NULL AND did IN (SELECT value FROM json_each(?1))",
        )?;
        let rows = stmt.query_map([serde_json::to_string(dids)?], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<Result<HashMap<_, _>, _>>()?)
    }

    /// Remove everything mirrored for an account that no longer exists:
    /// profile, posts, edges from and to it, likes and reposts. The repost
    /// ledger is kept. Returns the number of rows removed.
    pub fn purge_account(&self, did: &str) -> Result<usize, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let mut removed = 0;
        removed += tx.execute("DELETE FROM profiles WHERE did = ?1", [did])?;
        removed += tx.execute("DELETE FROM posts WHERE author = ?1", [did])?;
        removed += tx.execute("DELETE FROM follows WHERE author = ?1 OR subject = ?1", [did])?;
        removed += tx.execute("DELETE FROM blocks WHERE author = ?1 OR subject = ?1", [did])?;
        removed += tx.execute("DELETE FROM likes WHERE author = ?1", [did])?;
        removed += tx.execute("DELETE FROM reposts WHERE author = ?1", [did])?;

        tx.commit()?;
        Ok(removed)
    }

    // --- graph --------------------------------------------------------------

    /// Follow edges authored by `did` ("I follow")
    pub fn follows_by_author(&self, did: &str) -> Result<Vec<GraphEdge>, StoreError> {
        self.query_edges(
            "SELECT uri, cid, author, subject, indexed_at FROM follows
             WHERE author = ?1 ORDER BY indexed_at",
            did,
        )
    }

    /// Follow edges whose subject is `did` ("follows me")
    pub fn followers_of(&self, did: &str) -> Result<Vec<GraphEdge>, StoreError> {
        self.query_edges(
            "SELECT uri, cid, author, subject, indexed_at FROM follows
             WHERE subject = ?1 ORDER BY indexed_at",
            did,
        )
    }

    fn query_edges(&self, sql: &str, did: &str) -> Result<Vec<GraphEdge>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([did], read_edge)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Make the set of follow edges pointing at `did` equal to `edges`.
    /// Returns (removed, upserted).
    pub fn replace_followers_of(
        &self,
        did: &str,
        edges: &[GraphEdge],
    ) -> Result<(usize, usize), StoreError> {
        let keep: Vec<&str> = edges.iter().map(|e| e.uri.as_str()).collect();

        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let removed = tx.execute(
            "DELETE FROM follows
             WHERE subject = ?1 AND uri NOT IN (SELECT value FROM json_each(?2))",
            params![did, serde_json::to_string(&keep)?],
        )?;
        for edge in edges {
            ensure_profile(&tx, &edge.author, edge.indexed_at)?;
            put_edge(&tx, Entity::Follows, edge)?;
        }

        tx.commit()?;
        Ok((removed, edges.len()))
    }

    // --- repost ledger ------------------------------------------------------

    /// Subset of `uris` already present in the ledger
    pub fn licked_uris(&self, uris: &[String]) -> Result<HashSet<String>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT uri FROM licks WHERE uri IN (SELECT value FROM json_each(?1))",
        )?;
        let rows = stmt.query_map([serde_json::to_string(uris)?], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<HashSet<_>, _>>()?)
    }

    /// Insert ledger entries, ignoring uris already present. Returns the uris
    /// this call actually inserted, in input order.
    pub fn insert_licks(&self, licks: &[Lick]) -> Result<Vec<String>, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let mut inserted = Vec::new();
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO licks (uri, author, indexed_at) VALUES (?1, ?2, ?3)",
            )?;
            for lick in licks {
                if stmt.execute(params![lick.uri, lick.author, lick.indexed_at])? == 1 {
                    inserted.push(lick.uri.clone());
                }
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    // --- repost candidates / engagement --------------------------------------

    /// Top-level, language-classified posts by `authors` with
    /// `newer_than <= indexed_at <= older_than`, newest first.
    pub fn repost_candidates(
        &self,
        authors: &[String],
        newer_than: i64,
        older_than: i64,
    ) -> Result<Vec<Post>, StoreError> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {} FROM posts
             WHERE author IN (SELECT value FROM json_each(?1))
               AND indexed_at >= ?2 AND indexed_at <= ?3
               AND reply_root IS NULL
               AND languages IS NOT NULL
             ORDER BY indexed_at DESC",
            POST_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![serde_json::to_string(authors)?, newer_than, older_than],
            read_post,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Uris of classified top-level window posts not yet in the ledger.
    /// Their counters are refetched every cycle.
    pub fn posts_for_engagement(
        &self,
        authors: &[String],
        newer_than: i64,
        older_than: i64,
    ) -> Result<Vec<String>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT uri FROM posts
             WHERE author IN (SELECT value FROM json_each(?1))
               AND indexed_at >= ?2 AND indexed_at <= ?3
               AND reply_root IS NULL
               AND languages IS NOT NULL
               AND uri NOT IN (SELECT uri FROM licks)
             ORDER BY indexed_at DESC",
        )?;
        let rows = stmt.query_map(
            params![serde_json::to_string(authors)?, newer_than, older_than],
            |row| row.get::<_, String>(0),
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn update_engagement(
        &self,
        uri: &str,
        comments: i64,
        reposts: i64,
        likes: i64,
    ) -> Result<bool, StoreError> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE posts SET comments = ?2, reposts = ?3, likes = ?4 WHERE uri = ?1",
            params![uri, comments, reposts, likes],
        )?;
        Ok(changed > 0)
    }

    // --- derived snapshots --------------------------------------------------

    pub fn get_derived(&self, name: &str) -> Result<Option<DerivedData>, StoreError> {
        let conn = self.lock();
        Ok(conn
            .query_row(
                "SELECT name, data, updated_at FROM derived_data WHERE name = ?1",
                [name],
                |row| {
                    Ok(DerivedData {
                        name: row.get(0)?,
                        data: row.get(1)?,
                        updated_at: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    /// Replace a snapshot wholesale
    pub fn replace_derived(&self, name: &str, data: &str, now: i64) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO derived_data (name, data, updated_at) VALUES (?1, ?2, ?3)",
            params![name, data, now],
        )?;
        Ok(())
    }

    /// Merge freshly recomputed buckets into the stored histogram `name`
    /// (read and write in one IMMEDIATE transaction). Returns the merged list.
    pub fn merge_histogram(
        &self,
        name: &str,
        recomputed: &[HistogramBucket],
        now: i64,
    ) -> Result<Vec<HistogramBucket>, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stored: Option<String> = tx
            .query_row(
                "SELECT data FROM derived_data WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        let existing: Vec<HistogramBucket> = match stored {
            Some(data) => serde_json::from_str(&data)?,
            None => Vec::new(),
        };

        let merged = merge_buckets(&existing, recomputed);
        tx.execute(
            "INSERT OR REPLACE INTO derived_data (name, data, updated_at) VALUES (?1, ?2, ?3)",
            params![name, serde_json::to_string(&merged)?, now],
        )?;

        tx.commit()?;
        Ok(merged)
    }

    // --- aggregate queries --------------------------------------------------

    /// Subjects of follow or block edges indexed since `since`, ranked by count
    pub fn top_edge_subjects(
        &self,
        collection: Collection,
        since: i64,
        limit: usize,
    ) -> Result<Vec<RankedAccount>, StoreError> {
        let table = match collection {
            Collection::Follow | Collection::Block => collection.entity().table(),
            other => {
                return Err(StoreError::Database(rusqlite::Error::InvalidParameterName(
                    format!("{} is not an edge collection", other.nsid()),
                )))
            }
        };

        let conn = self.lock();
        let sql = format!(
            "SELECT e.subject, p.handle, p.display_name, p.avatar,
                    COUNT(*) AS cnt, MAX(e.indexed_at) AS most_recent
             FROM {} e
             LEFT JOIN profiles p ON p.did = e.subject
             WHERE e.indexed_at >= ?1
             GROUP BY e.subject
             ORDER BY cnt DESC, most_recent DESC
             LIMIT ?2",
            table
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![since, limit as i64], |row| {
            Ok(RankedAccount {
                did: row.get(0)?,
                handle: row.get(1)?,
                display_name: row.get(2)?,
                avatar: row.get(3)?,
                count: row.get(4)?,
                most_recent: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Authors of posts indexed since `since`, with summed engagement
    pub fn top_posters(&self, since: i64, limit: usize) -> Result<Vec<TopPoster>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT p.author, pr.handle, pr.display_name,
                    COUNT(*) AS posts,
                    COALESCE(SUM(p.comments), 0),
                    COALESCE(SUM(p.reposts), 0),
                    COALESCE(SUM(p.likes), 0) AS likes
             FROM posts p
             LEFT JOIN profiles pr ON pr.did = p.author
             WHERE p.indexed_at >= ?1
             GROUP BY p.author
             ORDER BY posts DESC, likes DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![since, limit as i64], |row| {
            Ok(TopPoster {
                did: row.get(0)?,
                handle: row.get(1)?,
                display_name: row.get(2)?,
                posts: row.get(3)?,
                comments: row.get(4)?,
                reposts: row.get(5)?,
                likes: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Per-hour row counts (`YYYY-MM-DD HH`, UTC) since `since`, newest first
    pub fn hourly_counts(
        &self,
        entity: Entity,
        since: i64,
    ) -> Result<Vec<HistogramBucket>, StoreError> {
        let conn = self.lock();
        let sql = format!(
            "SELECT strftime('%Y-%m-%d %H', indexed_at, 'unixepoch') AS bucket, COUNT(*)
             FROM {}
             WHERE indexed_at >= ?1
             GROUP BY bucket
             ORDER BY bucket DESC",
            entity.table()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([since], |row| {
            Ok(HistogramBucket {
                bucket: row.get(0)?,
                count: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

/// Execute the embedded schema files in filename order. Every file uses
/// `IF NOT EXISTS`, so re-running on an existing database is a no-op.
fn run_schema_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    log::info!("🔧 Running schema migrations");
    for (filename, sql) in MIGRATIONS {
        log::debug!("   ├─ Executing: {}", filename);
        conn.execute_batch(sql)?;
    }
    log::info!("   └─ ✅ {} schema files applied", MIGRATIONS.len());
    Ok(())
}

fn ensure_profile(conn: &Connection, did: &str, now: i64) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO profiles (did, indexed_at) VALUES (?1, ?2)",
        params![did, now],
    )?;
    Ok(())
}

/// Upsert a post; engagement counters already fetched are left untouched.
fn put_post(conn: &Connection, post: &Post) -> Result<(), StoreError> {
    let languages = match &post.languages {
        Some(langs) => Some(serde_json::to_string(langs)?),
        None => None,
    };

    conn.execute(
        "INSERT INTO posts (uri, cid, author, reply_parent, reply_root, quote_uri, languages,
                            has_images, text_length, comments, reposts, likes, indexed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(uri) DO UPDATE SET
            cid = excluded.cid,
            author = excluded.author,
            reply_parent = excluded.reply_parent,
            reply_root = excluded.reply_root,
            quote_uri = excluded.quote_uri,
            languages = excluded.languages,
            has_images = excluded.has_images,
            text_length = excluded.text_length,
            indexed_at = excluded.indexed_at",
        params![
            post.uri,
            post.cid,
            post.author,
            post.reply_parent,
            post.reply_root,
            post.quote_uri,
            languages,
            post.has_images,
            post.text_length,
            post.comments,
            post.reposts,
            post.likes,
            post.indexed_at,
        ],
    )?;
    Ok(())
}

fn put_edge(conn: &Connection, entity: Entity, edge: &GraphEdge) -> Result<(), StoreError> {
    let sql = format!(
        "INSERT INTO {} (uri, cid, author, subject, indexed_at) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(uri) DO UPDATE SET
            cid = excluded.cid,
            author = excluded.author,
            subject = excluded.subject,
            indexed_at = excluded.indexed_at",
        entity.table()
    );
    conn.execute(
        &sql,
        params![edge.uri, edge.cid, edge.author, edge.subject, edge.indexed_at],
    )?;
    Ok(())
}

fn put_interaction(
    conn: &Connection,
    entity: Entity,
    interaction: &Interaction,
) -> Result<(), StoreError> {
    let sql = format!(
        "INSERT INTO {} (uri, cid, author, subject_uri, subject_cid, indexed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(uri) DO UPDATE SET
            cid = excluded.cid,
            author = excluded.author,
            subject_uri = excluded.subject_uri,
            subject_cid = excluded.subject_cid,
            indexed_at = excluded.indexed_at",
        entity.table()
    );
    conn.execute(
        &sql,
        params![
            interaction.uri,
            interaction.cid,
            interaction.author,
            interaction.subject_uri,
            interaction.subject_cid,
            interaction.indexed_at,
        ],
    )?;
    Ok(())
}

fn delete_uri(conn: &Connection, entity: Entity, uri: &str) -> Result<usize, StoreError> {
    if entity == Entity::Profiles {
        return Ok(0);
    }
    let sql = format!("DELETE FROM {} WHERE uri = ?1", entity.table());
    Ok(conn.execute(&sql, [uri])?)
}

fn read_post(row: &Row<'_>) -> rusqlite::Result<Post> {
    let languages: Option<String> = row.get(6)?;
    let languages = match languages {
        Some(json) => Some(
            serde_json::from_str::<Vec<LanguageScore>>(&json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    6,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
        ),
        None => None,
    };

    Ok(Post {
        uri: row.get(0)?,
        cid: row.get(1)?,
        author: row.get(2)?,
        reply_parent: row.get(3)?,
        reply_root: row.get(4)?,
        quote_uri: row.get(5)?,
        languages,
        has_images: row.get(7)?,
        text_length: row.get(8)?,
        comments: row.get(9)?,
        reposts: row.get(10)?,
        likes: row.get(11)?,
        indexed_at: row.get(12)?,
    })
}

fn read_edge(row: &Row<'_>) -> rusqlite::Result<GraphEdge> {
    Ok(GraphEdge {
        uri: row.get(0)?,
        cid: row.get(1)?,
        author: row.get(2)?,
        subject: row.get(3)?,
        indexed_at: row.get(4)?,
    })
}

fn read_profile(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        did: row.get(0)?,
        handle: row.get(1)?,
        display_name: row.get(2)?,
        avatar: row.get(3)?,
        description: row.get(4)?,
        indexed_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}
