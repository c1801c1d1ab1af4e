//! SQLite persistence for the registry
//!
//! A single [`Store`] owns the connection. Uniqueness rules live in the
//! database as unique indexes rather than application-level
//! check-then-insert, so concurrent writers hit a constraint instead of a
//! race window. Download counters are incremented in SQL and verification
//! transitions are conditional updates, which keeps both safe under
//! concurrent requests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::registry::error::RegistryError;
use crate::registry::models::{Module, Notification, Rank, Release, User};

/// Schema migrations
/// Each version contains a list of SQL statements to execute
const MIGRATIONS: &[&[&str]] = &[
    // v1: announcement_handle column for retractable moderation messages
    &["ALTER TABLE releases ADD COLUMN announcement_handle TEXT"],
];

/// A module row joined with its owner, as consumed by the query engine.
#[derive(Debug, Clone)]
pub struct ModuleRow {
    pub module: Module,
    pub owner_name: String,
    pub owner_rank: Rank,
}

/// Row counts for the admin CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub users: i64,
    pub modules: i64,
    pub releases: i64,
    pub pending_releases: i64,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn new(db_path: &Path) -> Result<Self, RegistryError> {
        info!("Opening registry database at {:?}", db_path);
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self, RegistryError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, RegistryError> {
        // WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        debug!("Database connection established");

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        info!("Store initialized successfully");
        Ok(store)
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, RegistryError> {
        self.conn
            .lock()
            .map_err(|_| RegistryError::Invariant("connection lock poisoned".to_string()))
    }

    /// Get current timestamp in milliseconds since UNIX epoch
    pub(crate) fn current_timestamp_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn create_schema(&self) -> Result<(), RegistryError> {
        debug!("Creating database schema");

        let conn = self.lock_conn()?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password_hash TEXT NOT NULL,
                rank TEXT NOT NULL DEFAULT 'default',
                email_verified INTEGER NOT NULL DEFAULT 0,
                verification_token TEXT,
                reset_token TEXT,
                image TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS modules (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL REFERENCES users(id),
                name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                summary TEXT,
                description TEXT,
                image TEXT,
                downloads INTEGER NOT NULL DEFAULT 0,
                hidden INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_modules_owner ON modules(owner_id)",
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS module_tags (
                module_id TEXT NOT NULL REFERENCES modules(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                tag TEXT NOT NULL,
                UNIQUE(module_id, tag)
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS releases (
                id TEXT PRIMARY KEY,
                module_id TEXT NOT NULL REFERENCES modules(id) ON DELETE CASCADE,
                release_version TEXT NOT NULL,
                mod_version TEXT NOT NULL,
                game_versions TEXT NOT NULL,
                changelog TEXT,
                downloads INTEGER NOT NULL DEFAULT 0,
                verified INTEGER NOT NULL DEFAULT 0,
                verified_by TEXT,
                verified_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(module_id, release_version)
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_releases_module ON releases(module_id)",
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                description TEXT,
                read INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id)",
            [],
        )?;

        Self::apply_migrations(&conn)?;

        debug!("Database schema created successfully");
        Ok(())
    }

    /// Apply pending migrations based on user_version pragma
    fn apply_migrations(conn: &Connection) -> Result<(), RegistryError> {
        let current_version: i32 =
            conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        for (i, statements) in MIGRATIONS.iter().enumerate() {
            let version = (i + 1) as i32;
            if version > current_version {
                for sql in *statements {
                    // Handle "duplicate column name" for databases created
                    // before the migration system
                    match conn.execute(sql, []) {
                        Ok(_) => {}
                        Err(rusqlite::Error::SqliteFailure(_, Some(ref msg)))
                            if msg.contains("duplicate column name") =>
                        {
                            debug!("Column already exists, skipping: {}", sql);
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                debug!("Applied migration v{}", version);
            }
        }

        let target_version = MIGRATIONS.len() as i32;
        if target_version > current_version {
            conn.pragma_update(None, "user_version", target_version)?;
            debug!("Updated schema version to v{}", target_version);
        }

        Ok(())
    }

    // =========================================================================
    // Users
    // =========================================================================

    pub fn insert_user(&self, user: &User) -> Result<(), RegistryError> {
        let conn = self.lock_conn()?;
        let result = conn.execute(
            r#"
            INSERT INTO users (id, name, email, password_hash, rank, email_verified,
                               verification_token, reset_token, image, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            rusqlite::params![
                user.id.to_string(),
                user.name,
                user.email,
                user.password_hash,
                user.rank.as_str(),
                user.email_verified,
                user.verification_token,
                user.reset_token,
                user.image,
                user.created_at.timestamp_millis(),
                user.updated_at.timestamp_millis(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e, "users.") => Err(RegistryError::Conflict(
                "user name or email already taken".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub fn user_by_id(&self, id: Uuid) -> Result<Option<User>, RegistryError> {
        self.query_user("SELECT * FROM users WHERE id = ?1", &id.to_string())
    }

    pub fn user_by_name(&self, name: &str) -> Result<Option<User>, RegistryError> {
        self.query_user("SELECT * FROM users WHERE name = ?1 COLLATE NOCASE", name)
    }

    fn query_user(&self, sql: &str, param: &str) -> Result<Option<User>, RegistryError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([param])?;
        match rows.next()? {
            Some(row) => Ok(Some(user_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn set_user_rank(&self, id: Uuid, rank: Rank) -> Result<bool, RegistryError> {
        let conn = self.lock_conn()?;
        let updated = conn.execute(
            "UPDATE users SET rank = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![rank.as_str(), Self::current_timestamp_ms(), id.to_string()],
        )?;
        Ok(updated > 0)
    }

    // =========================================================================
    // Modules
    // =========================================================================

    pub fn insert_module(&self, module: &Module) -> Result<(), RegistryError> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        let result = tx.execute(
            r#"
            INSERT INTO modules (id, owner_id, name, summary, description, image,
                                 downloads, hidden, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            rusqlite::params![
                module.id.to_string(),
                module.owner_id.to_string(),
                module.name,
                module.summary,
                module.description,
                module.image,
                module.downloads,
                module.hidden,
                module.created_at.timestamp_millis(),
                module.updated_at.timestamp_millis(),
            ],
        );

        if let Err(e) = result {
            if is_constraint_violation(&e, "modules.name") {
                return Err(RegistryError::Conflict(format!(
                    "module name {} is already taken",
                    module.name
                )));
            }
            return Err(e.into());
        }

        insert_tags(&tx, module.id, &module.tags)?;
        tx.commit()?;
        Ok(())
    }

    pub fn update_module(&self, module: &Module) -> Result<(), RegistryError> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            r#"
            UPDATE modules
            SET summary = ?1, description = ?2, image = ?3, hidden = ?4, updated_at = ?5
            WHERE id = ?6
            "#,
            rusqlite::params![
                module.summary,
                module.description,
                module.image,
                module.hidden,
                Self::current_timestamp_ms(),
                module.id.to_string(),
            ],
        )?;
        if updated == 0 {
            return Err(RegistryError::NotFound("module not found"));
        }

        tx.execute(
            "DELETE FROM module_tags WHERE module_id = ?1",
            [module.id.to_string()],
        )?;
        insert_tags(&tx, module.id, &module.tags)?;
        tx.commit()?;
        Ok(())
    }

    pub fn delete_module(&self, id: Uuid) -> Result<bool, RegistryError> {
        let conn = self.lock_conn()?;
        let deleted = conn.execute("DELETE FROM modules WHERE id = ?1", [id.to_string()])?;
        Ok(deleted > 0)
    }

    pub fn module_by_id(&self, id: Uuid) -> Result<Option<Module>, RegistryError> {
        self.query_module("SELECT * FROM modules WHERE id = ?1", &id.to_string())
    }

    pub fn module_by_name(&self, name: &str) -> Result<Option<Module>, RegistryError> {
        self.query_module("SELECT * FROM modules WHERE name = ?1 COLLATE NOCASE", name)
    }

    fn query_module(&self, sql: &str, param: &str) -> Result<Option<Module>, RegistryError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([param])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let mut module = module_from_row(row)?;
        drop(rows);
        drop(stmt);
        module.tags = load_tags(&conn, module.id)?;
        Ok(Some(module))
    }

    /// Atomic download-counter increment, safe under concurrent requests.
    pub fn increment_module_downloads(&self, id: Uuid) -> Result<(), RegistryError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE modules SET downloads = downloads + 1 WHERE id = ?1",
            [id.to_string()],
        )?;
        Ok(())
    }

    /// All modules joined with their owner's name and rank, in creation order.
    pub fn modules_with_owner(&self) -> Result<Vec<ModuleRow>, RegistryError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT m.id, m.owner_id, m.name, m.summary, m.description, m.image,
                   m.downloads, m.hidden, m.created_at, m.updated_at,
                   u.name, u.rank
            FROM modules m
            JOIN users u ON m.owner_id = u.id
            ORDER BY m.rowid
            "#,
        )?;

        let raw: Vec<(RawModule, String, String)> = stmt
            .query_map([], |row| {
                Ok((
                    RawModule {
                        id: row.get(0)?,
                        owner_id: row.get(1)?,
                        name: row.get(2)?,
                        summary: row.get(3)?,
                        description: row.get(4)?,
                        image: row.get(5)?,
                        downloads: row.get(6)?,
                        hidden: row.get(7)?,
                        created_at: row.get(8)?,
                        updated_at: row.get(9)?,
                    },
                    row.get(10)?,
                    row.get(11)?,
                ))
            })?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        let mut tags_by_module = load_all_tags(&conn)?;

        raw.into_iter()
            .map(|(raw, owner_name, owner_rank)| {
                let mut module = raw.into_module()?;
                module.tags = tags_by_module.remove(&module.id).unwrap_or_default();
                Ok(ModuleRow {
                    module,
                    owner_name,
                    owner_rank: Rank::parse(&owner_rank)?,
                })
            })
            .collect()
    }

    // =========================================================================
    // Releases
    // =========================================================================

    /// Insert a release. The `UNIQUE(module_id, release_version)` index turns
    /// a concurrent duplicate publish into a [`RegistryError::DuplicateVersion`].
    pub fn insert_release(&self, release: &Release) -> Result<(), RegistryError> {
        let conn = self.lock_conn()?;
        let result = conn.execute(
            r#"
            INSERT INTO releases (id, module_id, release_version, mod_version, game_versions,
                                  changelog, downloads, verified, verified_by, verified_at,
                                  announcement_handle, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            rusqlite::params![
                release.id.to_string(),
                release.module_id.to_string(),
                release.release_version,
                release.mod_version,
                serde_json::to_string(&release.game_versions)
                    .map_err(|e| RegistryError::Invariant(e.to_string()))?,
                release.changelog,
                release.downloads,
                release.verified,
                release.verified_by.map(|id| id.to_string()),
                release.verified_at.map(|at| at.timestamp_millis()),
                release.announcement_handle,
                release.created_at.timestamp_millis(),
                release.updated_at.timestamp_millis(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e, "releases.module_id") => {
                Err(RegistryError::DuplicateVersion {
                    version: release.release_version.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn release_by_id(&self, id: Uuid) -> Result<Option<Release>, RegistryError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT * FROM releases WHERE id = ?1")?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(release_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// All releases of a module in insertion order. Insertion order is what
    /// makes the matcher's stable sort deterministic for tied versions.
    pub fn releases_for_module(&self, module_id: Uuid) -> Result<Vec<Release>, RegistryError> {
        let conn = self.lock_conn()?;
        let mut stmt =
            conn.prepare("SELECT * FROM releases WHERE module_id = ?1 ORDER BY rowid")?;
        let mut rows = stmt.query([module_id.to_string()])?;
        let mut releases = Vec::new();
        while let Some(row) = rows.next()? {
            releases.push(release_from_row(row)?);
        }
        Ok(releases)
    }

    /// All pending releases with their module names, oldest first.
    pub fn pending_releases(&self) -> Result<Vec<(Release, String)>, RegistryError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT r.*, m.name FROM releases r
            JOIN modules m ON r.module_id = m.id
            WHERE r.verified = 0
            ORDER BY r.rowid
            "#,
        )?;
        let mut rows = stmt.query([])?;
        let mut pending = Vec::new();
        while let Some(row) = rows.next()? {
            let release = release_from_row(row)?;
            let module_name: String = row.get(13)?;
            pending.push((release, module_name));
        }
        Ok(pending)
    }

    /// Conditionally mark a pending release verified.
    ///
    /// Returns false when the release is missing or already verified, which
    /// is how the second of two racing moderators observes the conflict.
    pub fn mark_verified(&self, release_id: Uuid, moderator: Uuid) -> Result<bool, RegistryError> {
        let now = Self::current_timestamp_ms();
        let conn = self.lock_conn()?;
        let updated = conn.execute(
            r#"
            UPDATE releases
            SET verified = 1, verified_by = ?1, verified_at = ?2, updated_at = ?2
            WHERE id = ?3 AND verified = 0
            "#,
            rusqlite::params![moderator.to_string(), now, release_id.to_string()],
        )?;
        Ok(updated > 0)
    }

    /// Conditionally delete a pending release; the rejection counterpart of
    /// [`Store::mark_verified`].
    pub fn delete_release_if_pending(&self, release_id: Uuid) -> Result<bool, RegistryError> {
        let conn = self.lock_conn()?;
        let deleted = conn.execute(
            "DELETE FROM releases WHERE id = ?1 AND verified = 0",
            [release_id.to_string()],
        )?;
        Ok(deleted > 0)
    }

    pub fn delete_release(&self, release_id: Uuid) -> Result<bool, RegistryError> {
        let conn = self.lock_conn()?;
        let deleted =
            conn.execute("DELETE FROM releases WHERE id = ?1", [release_id.to_string()])?;
        Ok(deleted > 0)
    }

    pub fn set_announcement_handle(
        &self,
        release_id: Uuid,
        handle: Option<&str>,
    ) -> Result<(), RegistryError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE releases SET announcement_handle = ?1 WHERE id = ?2",
            rusqlite::params![handle, release_id.to_string()],
        )?;
        Ok(())
    }

    pub fn increment_release_downloads(&self, id: Uuid) -> Result<(), RegistryError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE releases SET downloads = downloads + 1 WHERE id = ?1",
            [id.to_string()],
        )?;
        Ok(())
    }

    /// Distinct tags across all modules, alphabetical.
    pub fn distinct_tags(&self) -> Result<Vec<String>, RegistryError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT tag FROM module_tags ORDER BY tag")?;
        let tags = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(tags)
    }

    /// Distinct mod versions across all verified releases.
    pub fn distinct_mod_versions(&self) -> Result<Vec<String>, RegistryError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT mod_version FROM releases WHERE verified = 1 ORDER BY mod_version",
        )?;
        let versions = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(versions)
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    pub fn insert_notification(&self, notification: &Notification) -> Result<(), RegistryError> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"
            INSERT INTO notifications (id, user_id, title, description, read, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            rusqlite::params![
                notification.id.to_string(),
                notification.user_id.to_string(),
                notification.title,
                notification.description,
                notification.read,
                notification.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// A user's notifications, newest first.
    pub fn notifications_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Notification>, RegistryError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, title, description, read, created_at
             FROM notifications WHERE user_id = ?1 ORDER BY rowid DESC",
        )?;
        let mut rows = stmt.query([user_id.to_string()])?;
        let mut notifications = Vec::new();
        while let Some(row) = rows.next()? {
            notifications.push(Notification {
                id: parse_uuid(&row.get::<_, String>(0)?)?,
                user_id: parse_uuid(&row.get::<_, String>(1)?)?,
                title: row.get(2)?,
                description: row.get(3)?,
                read: row.get(4)?,
                created_at: ms_to_datetime(row.get(5)?)?,
            });
        }
        Ok(notifications)
    }

    pub fn mark_notification_read(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<bool, RegistryError> {
        let conn = self.lock_conn()?;
        let updated = conn.execute(
            "UPDATE notifications SET read = 1 WHERE id = ?1 AND user_id = ?2",
            rusqlite::params![id.to_string(), user_id.to_string()],
        )?;
        Ok(updated > 0)
    }

    // =========================================================================
    // Stats
    // =========================================================================

    pub fn stats(&self) -> Result<StoreStats, RegistryError> {
        let conn = self.lock_conn()?;
        let count = |sql: &str| -> Result<i64, rusqlite::Error> {
            conn.query_row(sql, [], |row| row.get(0))
        };
        Ok(StoreStats {
            users: count("SELECT COUNT(*) FROM users")?,
            modules: count("SELECT COUNT(*) FROM modules")?,
            releases: count("SELECT COUNT(*) FROM releases")?,
            pending_releases: count("SELECT COUNT(*) FROM releases WHERE verified = 0")?,
        })
    }
}

// =============================================================================
// Row mapping
// =============================================================================

struct RawModule {
    id: String,
    owner_id: String,
    name: String,
    summary: Option<String>,
    description: Option<String>,
    image: Option<String>,
    downloads: i64,
    hidden: bool,
    created_at: i64,
    updated_at: i64,
}

impl RawModule {
    fn into_module(self) -> Result<Module, RegistryError> {
        Ok(Module {
            id: parse_uuid(&self.id)?,
            owner_id: parse_uuid(&self.owner_id)?,
            name: self.name,
            summary: self.summary,
            description: self.description,
            image: self.image,
            downloads: self.downloads,
            hidden: self.hidden,
            tags: IndexSet::new(),
            created_at: ms_to_datetime(self.created_at)?,
            updated_at: ms_to_datetime(self.updated_at)?,
        })
    }
}

fn user_from_row(row: &rusqlite::Row<'_>) -> Result<User, RegistryError> {
    Ok(User {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        rank: Rank::parse(&row.get::<_, String>(4)?)?,
        email_verified: row.get(5)?,
        verification_token: row.get(6)?,
        reset_token: row.get(7)?,
        image: row.get(8)?,
        created_at: ms_to_datetime(row.get(9)?)?,
        updated_at: ms_to_datetime(row.get(10)?)?,
    })
}

fn module_from_row(row: &rusqlite::Row<'_>) -> Result<Module, RegistryError> {
    RawModule {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        summary: row.get(3)?,
        description: row.get(4)?,
        image: row.get(5)?,
        downloads: row.get(6)?,
        hidden: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    }
    .into_module()
}

fn release_from_row(row: &rusqlite::Row<'_>) -> Result<Release, RegistryError> {
    let game_versions: String = row.get(4)?;
    let game_versions: IndexSet<String> = serde_json::from_str(&game_versions)
        .map_err(|e| RegistryError::Invariant(format!("corrupt game_versions column: {e}")))?;

    Ok(Release {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        module_id: parse_uuid(&row.get::<_, String>(1)?)?,
        release_version: row.get(2)?,
        mod_version: row.get(3)?,
        game_versions,
        changelog: row.get(5)?,
        downloads: row.get(6)?,
        verified: row.get(7)?,
        verified_by: row
            .get::<_, Option<String>>(8)?
            .map(|s| parse_uuid(&s))
            .transpose()?,
        verified_at: row
            .get::<_, Option<i64>>(9)?
            .map(ms_to_datetime)
            .transpose()?,
        created_at: ms_to_datetime(row.get(10)?)?,
        updated_at: ms_to_datetime(row.get(11)?)?,
        announcement_handle: row.get(12)?,
    })
}

fn insert_tags(
    tx: &rusqlite::Transaction<'_>,
    module_id: Uuid,
    tags: &IndexSet<String>,
) -> Result<(), RegistryError> {
    let mut stmt =
        tx.prepare("INSERT INTO module_tags (module_id, position, tag) VALUES (?1, ?2, ?3)")?;
    for (position, tag) in tags.iter().enumerate() {
        stmt.execute(rusqlite::params![
            module_id.to_string(),
            position as i64,
            tag
        ])?;
    }
    Ok(())
}

fn load_tags(conn: &Connection, module_id: Uuid) -> Result<IndexSet<String>, RegistryError> {
    let mut stmt =
        conn.prepare("SELECT tag FROM module_tags WHERE module_id = ?1 ORDER BY position")?;
    let tags = stmt
        .query_map([module_id.to_string()], |row| row.get(0))?
        .collect::<Result<IndexSet<String>, _>>()?;
    Ok(tags)
}

fn load_all_tags(conn: &Connection) -> Result<HashMap<Uuid, IndexSet<String>>, RegistryError> {
    let mut stmt =
        conn.prepare("SELECT module_id, tag FROM module_tags ORDER BY module_id, position")?;
    let pairs: Vec<(String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<_, _>>()?;

    let mut by_module: HashMap<Uuid, IndexSet<String>> = HashMap::new();
    for (module_id, tag) in pairs {
        by_module
            .entry(parse_uuid(&module_id)?)
            .or_default()
            .insert(tag);
    }
    Ok(by_module)
}

fn parse_uuid(text: &str) -> Result<Uuid, RegistryError> {
    Uuid::parse_str(text).map_err(|e| RegistryError::Invariant(format!("corrupt uuid column: {e}")))
}

fn ms_to_datetime(ms: i64) -> Result<DateTime<Utc>, RegistryError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| RegistryError::Invariant(format!("timestamp out of range: {ms}")))
}

fn is_constraint_violation(e: &rusqlite::Error, needle: &str) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, Some(msg))
            if err.code == rusqlite::ErrorCode::ConstraintViolation && msg.contains(needle)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::models::test_support::{new_module, new_release, new_user};

    #[test]
    fn duplicate_release_version_is_rejected_per_module() {
        let store = Store::in_memory().unwrap();
        let user = new_user("alice", Rank::Default);
        store.insert_user(&user).unwrap();
        let module_a = new_module(user.id, "ModuleA");
        let module_b = new_module(user.id, "ModuleB");
        store.insert_module(&module_a).unwrap();
        store.insert_module(&module_b).unwrap();

        store
            .insert_release(&new_release(module_a.id, "1.0.0", "3.0.0", &["1.19.4"]))
            .unwrap();

        let err = store
            .insert_release(&new_release(module_a.id, "1.0.0", "3.1.0", &["1.20.1"]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateVersion { ref version } if version == "1.0.0"));

        // A different module may reuse the version string.
        store
            .insert_release(&new_release(module_b.id, "1.0.0", "3.0.0", &["1.19.4"]))
            .unwrap();
    }

    #[test]
    fn module_names_are_unique_case_insensitively() {
        let store = Store::in_memory().unwrap();
        let user = new_user("alice", Rank::Default);
        store.insert_user(&user).unwrap();
        store.insert_module(&new_module(user.id, "Foo")).unwrap();

        let err = store.insert_module(&new_module(user.id, "foo")).unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(_)));

        // And lookup ignores case too.
        assert!(store.module_by_name("FOO").unwrap().is_some());
    }

    #[test]
    fn mark_verified_is_one_shot() {
        let store = Store::in_memory().unwrap();
        let user = new_user("alice", Rank::Default);
        let moderator = new_user("mod", Rank::Trusted);
        store.insert_user(&user).unwrap();
        store.insert_user(&moderator).unwrap();
        let module = new_module(user.id, "Foo");
        store.insert_module(&module).unwrap();
        let release = new_release(module.id, "1.0.0", "3.0.0", &["1.19.4"]);
        store.insert_release(&release).unwrap();

        assert!(store.mark_verified(release.id, moderator.id).unwrap());
        // Second moderator loses the race.
        assert!(!store.mark_verified(release.id, moderator.id).unwrap());

        let stored = store.release_by_id(release.id).unwrap().unwrap();
        assert!(stored.verified);
        assert_eq!(stored.verified_by, Some(moderator.id));
        assert!(stored.verified_at.is_some());
    }

    #[test]
    fn delete_release_if_pending_skips_verified_releases() {
        let store = Store::in_memory().unwrap();
        let user = new_user("alice", Rank::Default);
        store.insert_user(&user).unwrap();
        let module = new_module(user.id, "Foo");
        store.insert_module(&module).unwrap();
        let release = new_release(module.id, "1.0.0", "3.0.0", &["1.19.4"]);
        store.insert_release(&release).unwrap();
        store.mark_verified(release.id, user.id).unwrap();

        assert!(!store.delete_release_if_pending(release.id).unwrap());
        assert!(store.release_by_id(release.id).unwrap().is_some());
    }

    #[test]
    fn download_counters_increment() {
        let store = Store::in_memory().unwrap();
        let user = new_user("alice", Rank::Default);
        store.insert_user(&user).unwrap();
        let module = new_module(user.id, "Foo");
        store.insert_module(&module).unwrap();
        let release = new_release(module.id, "1.0.0", "3.0.0", &["1.19.4"]);
        store.insert_release(&release).unwrap();

        store.increment_module_downloads(module.id).unwrap();
        store.increment_module_downloads(module.id).unwrap();
        store.increment_release_downloads(release.id).unwrap();

        assert_eq!(store.module_by_id(module.id).unwrap().unwrap().downloads, 2);
        assert_eq!(store.release_by_id(release.id).unwrap().unwrap().downloads, 1);
    }

    #[test]
    fn tags_round_trip_in_insertion_order() {
        let store = Store::in_memory().unwrap();
        let user = new_user("alice", Rank::Default);
        store.insert_user(&user).unwrap();
        let mut module = new_module(user.id, "Foo");
        module.tags = ["utility", "library", "chat"]
            .into_iter()
            .map(String::from)
            .collect();
        store.insert_module(&module).unwrap();

        let stored = store.module_by_id(module.id).unwrap().unwrap();
        let tags: Vec<&String> = stored.tags.iter().collect();
        assert_eq!(tags, ["utility", "library", "chat"]);

        let mut distinct = store.distinct_tags().unwrap();
        distinct.sort();
        assert_eq!(distinct, ["chat", "library", "utility"]);
    }

    #[test]
    fn deleting_a_module_cascades_to_releases_and_tags() {
        let store = Store::in_memory().unwrap();
        let user = new_user("alice", Rank::Default);
        store.insert_user(&user).unwrap();
        let mut module = new_module(user.id, "Foo");
        module.tags.insert("utility".to_string());
        store.insert_module(&module).unwrap();
        let release = new_release(module.id, "1.0.0", "3.0.0", &["1.19.4"]);
        store.insert_release(&release).unwrap();

        assert!(store.delete_module(module.id).unwrap());
        assert!(store.release_by_id(release.id).unwrap().is_none());
        assert!(store.distinct_tags().unwrap().is_empty());
    }
}
