// crates/placement-store-sqlite/src/catalog.rs
// ============================================================================
// Module: SQLite Catalog
// Description: Relational catalog persistence and candidate query planning.
// Purpose: Implement CatalogStore over SQLite with transactional writes.
// Dependencies: placement-core, rusqlite, serde, thiserror
// ============================================================================

//! ## Overview
//! The catalog keeps providers, inventories, capabilities, provider groups,
//! distances, consumers, and allocations in SQLite. Reads go through a small
//! round-robin connection pool; writes serialize on one connection and run
//! inside immediate transactions. Allocation persistence re-evaluates the
//! time-windowed capacity invariant as its last step before commit, so of
//! two racing claims over the same inventory exactly one succeeds.
//!
//! Candidate queries mirror the shapes the solver composes over: capacity
//! in a window (with overlap semantics), has-all/has-any capabilities,
//! group membership, and distance bands. All candidate queries order by
//! ascending provider id and honor an exclusion id list.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use placement_core::Allocation;
use placement_core::AllocationId;
use placement_core::AllocationReceipt;
use placement_core::CapabilityCode;
use placement_core::CapabilityId;
use placement_core::CapacityQuery;
use placement_core::CatalogError;
use placement_core::CatalogMetadata;
use placement_core::CatalogQueries;
use placement_core::CatalogSeed;
use placement_core::CatalogStore;
use placement_core::ClaimWindow;
use placement_core::CodeKind;
use placement_core::DistanceCode;
use placement_core::DistanceQuery;
use placement_core::DistanceTypeCode;
use placement_core::DistanceTypeId;
use placement_core::GroupMembershipQuery;
use placement_core::Inventory;
use placement_core::Partition;
use placement_core::PartitionId;
use placement_core::Provider;
use placement_core::ProviderGroup;
use placement_core::ProviderGroupId;
use placement_core::ProviderId;
use placement_core::ProviderIdentity;
use placement_core::ProviderRegistration;
use placement_core::ResolvedCapabilityConstraint;
use placement_core::ResourceClassCode;
use placement_core::ResourceClassId;
use placement_core::Uuid;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the catalog.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms); doubles as the per-query contention bound.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 2_000;
/// Default read pool size.
const DEFAULT_READ_POOL_SIZE: usize = 4;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` catalog.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
/// - `read_pool_size` must be greater than zero.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteCatalogConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Number of read-only connections used for candidate queries.
    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: usize,
}

impl SqliteCatalogConfig {
    /// Creates a config with defaults for the given database path.
    #[must_use]
    pub fn for_path(path: PathBuf) -> Self {
        Self {
            path,
            busy_timeout_ms: default_busy_timeout_ms(),
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
            read_pool_size: default_read_pool_size(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default read pool size.
const fn default_read_pool_size() -> usize {
    DEFAULT_READ_POOL_SIZE
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while opening or validating the catalog database.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum SqliteCatalogError {
    /// Filesystem or connection failure.
    #[error("catalog io error: {0}")]
    Io(String),
    /// Configuration rejected before opening.
    #[error("catalog config invalid: {0}")]
    Config(String),
    /// Stored schema version is newer than this build supports.
    #[error("catalog schema version mismatch: {0}")]
    VersionMismatch(String),
    /// Any other database failure during initialization.
    #[error("catalog database error: {0}")]
    Db(String),
}

// ============================================================================
// SECTION: Stats
// ============================================================================

/// Internal mutable operation counters.
#[derive(Debug, Default)]
struct SqliteCatalogStats {
    /// Candidate queries served.
    candidate_queries: u64,
    /// Provider registrations committed.
    registrations: u64,
    /// Allocations persisted.
    allocations_persisted: u64,
    /// Allocations rejected by the capacity re-check.
    capacity_rejections: u64,
    /// Busy/locked errors observed.
    busy_errors: u64,
}

/// Serializable snapshot of catalog operation counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteCatalogStatsSnapshot {
    /// Candidate queries served.
    pub candidate_queries: u64,
    /// Provider registrations committed.
    pub registrations: u64,
    /// Allocations persisted.
    pub allocations_persisted: u64,
    /// Allocations rejected by the capacity re-check.
    pub capacity_rejections: u64,
    /// Busy/locked errors observed.
    pub busy_errors: u64,
}

// ============================================================================
// SECTION: Catalog Handle
// ============================================================================

/// SQLite-backed catalog store.
///
/// # Invariants
/// - All writes serialize on `write_connection`; reads round-robin over the
///   read pool and see committed snapshots (WAL).
pub struct SqliteCatalog {
    /// Serialized write connection.
    write_connection: Mutex<Connection>,
    /// Read connection pool for candidate queries.
    read_connections: Vec<Mutex<Connection>>,
    /// Round-robin cursor into the read pool.
    read_cursor: AtomicUsize,
    /// Operation counters.
    stats: Mutex<SqliteCatalogStats>,
}

impl std::fmt::Debug for SqliteCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCatalog")
            .field("read_pool_size", &self.read_connections.len())
            .finish_non_exhaustive()
    }
}

impl SqliteCatalog {
    /// Opens (and idempotently initializes) a catalog database.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteCatalogError`] when the path is invalid, the database
    /// cannot be opened, or the stored schema version is unsupported.
    pub fn new(config: &SqliteCatalogConfig) -> Result<Self, SqliteCatalogError> {
        if config.read_pool_size == 0 {
            return Err(SqliteCatalogError::Config("read_pool_size must be > 0".to_string()));
        }
        if config.path.is_dir() {
            return Err(SqliteCatalogError::Config(format!(
                "path {} is a directory",
                config.path.display()
            )));
        }
        ensure_parent_dir(&config.path)?;
        let mut write_connection = open_connection(config)?;
        initialize_schema(&mut write_connection)?;
        let mut read_connections = Vec::with_capacity(config.read_pool_size);
        for _ in 0 .. config.read_pool_size {
            read_connections.push(Mutex::new(open_connection(config)?));
        }
        Ok(Self {
            write_connection: Mutex::new(write_connection),
            read_connections,
            read_cursor: AtomicUsize::new(0),
            stats: Mutex::new(SqliteCatalogStats::default()),
        })
    }

    /// Returns a snapshot of the catalog's operation counters.
    #[must_use]
    pub fn stats(&self) -> SqliteCatalogStatsSnapshot {
        let stats = match self.stats.lock() {
            Ok(stats) => stats,
            Err(poisoned) => poisoned.into_inner(),
        };
        SqliteCatalogStatsSnapshot {
            candidate_queries: stats.candidate_queries,
            registrations: stats.registrations,
            allocations_persisted: stats.allocations_persisted,
            capacity_rejections: stats.capacity_rejections,
            busy_errors: stats.busy_errors,
        }
    }

    /// Picks the next read connection round-robin.
    fn read_connection(&self) -> &Mutex<Connection> {
        let cursor = self.read_cursor.fetch_add(1, Ordering::Relaxed);
        &self.read_connections[cursor % self.read_connections.len()]
    }

    /// Bumps one stats counter through the closure.
    fn record<F: FnOnce(&mut SqliteCatalogStats)>(&self, update: F) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }

    /// Runs a candidate query returning `(id, uuid)` rows.
    fn run_candidate_query(
        &self,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<Vec<ProviderIdentity>, CatalogError> {
        self.record(|stats| stats.candidate_queries += 1);
        let guard = lock_connection(self.read_connection())?;
        let mut stmt = guard.prepare(sql).map_err(map_sqlite_error)?;
        let rows = stmt
            .query_map(params_from_iter(params), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(map_sqlite_error)?;
        let mut identities = Vec::new();
        for row in rows {
            let (id, uuid) = row.map_err(map_sqlite_error)?;
            identities.push(ProviderIdentity {
                id: provider_id_from_db(id)?,
                uuid: Uuid::new(uuid),
            });
        }
        Ok(identities)
    }
}

// ============================================================================
// SECTION: Connection Setup
// ============================================================================

/// Creates the parent directory for the database file when missing.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteCatalogError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)
            .map_err(|err| SqliteCatalogError::Io(format!("create {}: {err}", parent.display())))?;
    }
    Ok(())
}

/// Opens one connection with the configured pragmas applied.
fn open_connection(config: &SqliteCatalogConfig) -> Result<Connection, SqliteCatalogError> {
    let connection = Connection::open(&config.path)
        .map_err(|err| SqliteCatalogError::Io(format!("open {}: {err}", config.path.display())))?;
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| SqliteCatalogError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!(
            "PRAGMA journal_mode = {};",
            config.journal_mode.pragma_value()
        ))
        .map_err(|err| SqliteCatalogError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| SqliteCatalogError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA busy_timeout = {};", config.busy_timeout_ms))
        .map_err(|err| SqliteCatalogError::Db(err.to_string()))?;
    Ok(connection)
}

/// Creates the catalog tables and validates the stored schema version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteCatalogError> {
    let tx = connection
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|err| SqliteCatalogError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS catalog_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteCatalogError::Db(err.to_string()))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM catalog_meta LIMIT 1", [], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteCatalogError::Db(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO catalog_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteCatalogError::Db(err.to_string()))?;
        }
        Some(stored) if stored == SCHEMA_VERSION => {}
        Some(stored) => {
            return Err(SqliteCatalogError::VersionMismatch(format!(
                "stored {stored}, supported {SCHEMA_VERSION}"
            )));
        }
    }
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS partitions (
            id INTEGER PRIMARY KEY,
            uuid TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS providers (
            id INTEGER PRIMARY KEY,
            uuid TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            partition_id INTEGER NOT NULL REFERENCES partitions(id),
            generation INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS provider_groups (
            id INTEGER PRIMARY KEY,
            uuid TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL UNIQUE
        );
        CREATE TABLE IF NOT EXISTS provider_group_members (
            provider_id INTEGER NOT NULL REFERENCES providers(id),
            group_id INTEGER NOT NULL REFERENCES provider_groups(id),
            PRIMARY KEY (provider_id, group_id)
        );
        CREATE TABLE IF NOT EXISTS resource_classes (
            id INTEGER PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS capabilities (
            id INTEGER PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS provider_capabilities (
            provider_id INTEGER NOT NULL REFERENCES providers(id),
            capability_id INTEGER NOT NULL REFERENCES capabilities(id),
            PRIMARY KEY (provider_id, capability_id)
        );
        CREATE TABLE IF NOT EXISTS inventories (
            provider_id INTEGER NOT NULL REFERENCES providers(id),
            resource_class_id INTEGER NOT NULL REFERENCES resource_classes(id),
            total INTEGER NOT NULL,
            reserved INTEGER NOT NULL,
            min_unit INTEGER NOT NULL,
            max_unit INTEGER NOT NULL,
            step_size INTEGER NOT NULL,
            allocation_ratio REAL NOT NULL,
            PRIMARY KEY (provider_id, resource_class_id)
        );
        CREATE TABLE IF NOT EXISTS distance_types (
            id INTEGER PRIMARY KEY,
            code TEXT NOT NULL UNIQUE
        );
        CREATE TABLE IF NOT EXISTS distances (
            id INTEGER PRIMARY KEY,
            type_id INTEGER NOT NULL REFERENCES distance_types(id),
            code TEXT NOT NULL,
            position INTEGER NOT NULL,
            UNIQUE (type_id, code)
        );
        CREATE TABLE IF NOT EXISTS provider_distances (
            provider_id INTEGER NOT NULL REFERENCES providers(id),
            group_id INTEGER NOT NULL REFERENCES provider_groups(id),
            distance_id INTEGER NOT NULL REFERENCES distances(id),
            PRIMARY KEY (provider_id, group_id, distance_id)
        );
        CREATE TABLE IF NOT EXISTS consumers (
            id INTEGER PRIMARY KEY,
            uuid TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            project TEXT,
            user TEXT
        );
        CREATE TABLE IF NOT EXISTS allocations (
            id INTEGER PRIMARY KEY,
            consumer_id INTEGER NOT NULL REFERENCES consumers(id),
            claim_time INTEGER NOT NULL,
            release_time INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_allocations_window
            ON allocations (claim_time, release_time);
        CREATE TABLE IF NOT EXISTS allocation_items (
            id INTEGER PRIMARY KEY,
            allocation_id INTEGER NOT NULL REFERENCES allocations(id),
            provider_id INTEGER NOT NULL REFERENCES providers(id),
            resource_class_id INTEGER NOT NULL REFERENCES resource_classes(id),
            used INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_allocation_items_provider_rc
            ON allocation_items (provider_id, resource_class_id);",
    )
    .map_err(|err| SqliteCatalogError::Db(err.to_string()))?;
    tx.commit().map_err(|err| SqliteCatalogError::Db(err.to_string()))
}

// ============================================================================
// SECTION: Error and Value Mapping
// ============================================================================

/// Classifies a `rusqlite` error into the catalog error taxonomy.
fn map_sqlite_error(error: rusqlite::Error) -> CatalogError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                CatalogError::Retryable(error.to_string())
            }
            ErrorCode::ConstraintViolation => CatalogError::Conflict(error.to_string()),
            _ => CatalogError::Db(error.to_string()),
        },
        _ => CatalogError::Db(error.to_string()),
    }
}

/// Locks a connection mutex, surfacing poisoning as a database error.
fn lock_connection(connection: &Mutex<Connection>) -> Result<std::sync::MutexGuard<'_, Connection>, CatalogError> {
    connection.lock().map_err(|_| CatalogError::Db("connection mutex poisoned".to_string()))
}

/// Converts an internal id to its database form.
fn id_to_db(raw: u64) -> Result<i64, CatalogError> {
    i64::try_from(raw).map_err(|_| CatalogError::Db(format!("id {raw} out of range")))
}

/// Converts an amount to its database form.
fn amount_to_db(amount: u64) -> Result<i64, CatalogError> {
    i64::try_from(amount).map_err(|_| CatalogError::Db(format!("amount {amount} out of range")))
}

/// Converts a collection length to its database form.
fn count_to_db(count: usize) -> Result<i64, CatalogError> {
    i64::try_from(count).map_err(|_| CatalogError::Db(format!("count {count} out of range")))
}

/// Converts a database row id into a provider id.
fn provider_id_from_db(raw: i64) -> Result<ProviderId, CatalogError> {
    u64::try_from(raw)
        .ok()
        .and_then(ProviderId::from_raw)
        .ok_or_else(|| CatalogError::Db(format!("invalid provider id {raw}")))
}

/// Renders `count` comma-separated positional placeholders.
fn placeholders(count: usize) -> String {
    let mut rendered = String::with_capacity(count * 2);
    for index in 0 .. count {
        if index > 0 {
            rendered.push(',');
        }
        rendered.push('?');
    }
    rendered
}

/// Appends an exclusion clause when the id list is non-empty.
fn push_exclusion(
    sql: &mut String,
    params: &mut Vec<Value>,
    keyword: &str,
    exclude: &[ProviderId],
) -> Result<(), CatalogError> {
    if exclude.is_empty() {
        return Ok(());
    }
    sql.push_str(&format!(" {keyword} p.id NOT IN ({})", placeholders(exclude.len())));
    for id in exclude {
        params.push(Value::Integer(id_to_db(id.get())?));
    }
    Ok(())
}

/// Appends a limit clause unless the limit is unbounded (`usize::MAX`).
fn push_limit(sql: &mut String, params: &mut Vec<Value>, limit: usize) -> Result<(), CatalogError> {
    if limit == usize::MAX {
        return Ok(());
    }
    sql.push_str(" LIMIT ?");
    params.push(Value::Integer(
        i64::try_from(limit).map_err(|_| CatalogError::Db(format!("limit {limit} out of range")))?,
    ));
    Ok(())
}

/// Pushes capability id parameters.
fn push_capability_ids(params: &mut Vec<Value>, ids: &[CapabilityId]) -> Result<(), CatalogError> {
    for id in ids {
        params.push(Value::Integer(id_to_db(id.get())?));
    }
    Ok(())
}

// ============================================================================
// SECTION: Transaction Lookups
// ============================================================================

/// Resolves a resource class code inside a transaction.
fn lookup_resource_class(
    tx: &Transaction<'_>,
    code: &ResourceClassCode,
) -> Result<i64, CatalogError> {
    tx.query_row("SELECT id FROM resource_classes WHERE code = ?1", params![code.as_str()], |row| {
        row.get(0)
    })
    .optional()
    .map_err(map_sqlite_error)?
    .ok_or_else(|| CatalogError::UnknownCode {
        kind: CodeKind::ResourceClass,
        code: code.as_str().to_string(),
    })
}

/// Resolves a capability code inside a transaction.
fn lookup_capability(tx: &Transaction<'_>, code: &CapabilityCode) -> Result<i64, CatalogError> {
    tx.query_row("SELECT id FROM capabilities WHERE code = ?1", params![code.as_str()], |row| {
        row.get(0)
    })
    .optional()
    .map_err(map_sqlite_error)?
    .ok_or_else(|| CatalogError::UnknownCode {
        kind: CodeKind::Capability,
        code: code.as_str().to_string(),
    })
}

/// Resolves a provider group name inside a transaction.
fn lookup_group(tx: &Transaction<'_>, name: &str) -> Result<i64, CatalogError> {
    tx.query_row("SELECT id FROM provider_groups WHERE name = ?1", params![name], |row| row.get(0))
        .optional()
        .map_err(map_sqlite_error)?
        .ok_or_else(|| CatalogError::UnknownCode {
            kind: CodeKind::ProviderGroup,
            code: name.to_string(),
        })
}

/// Resolves a `(distance type, distance)` pair inside a transaction.
fn lookup_distance(
    tx: &Transaction<'_>,
    distance_type: &DistanceTypeCode,
    distance: &DistanceCode,
) -> Result<i64, CatalogError> {
    tx.query_row(
        "SELECT d.id FROM distances AS d
         JOIN distance_types AS t ON d.type_id = t.id
         WHERE t.code = ?1 AND d.code = ?2",
        params![distance_type.as_str(), distance.as_str()],
        |row| row.get(0),
    )
    .optional()
    .map_err(map_sqlite_error)?
    .ok_or_else(|| CatalogError::UnknownCode {
        kind: CodeKind::Distance,
        code: format!("{}/{}", distance_type.as_str(), distance.as_str()),
    })
}

/// Re-checks the capacity invariant for one `(provider, resource class)`
/// pair inside the persist transaction. The new items are already inserted,
/// so their usage participates in the sum.
fn capacity_holds(
    tx: &Transaction<'_>,
    provider_id: i64,
    resource_class_id: i64,
    window: &ClaimWindow,
) -> Result<Option<bool>, CatalogError> {
    tx.query_row(
        "SELECT ((i.total - i.reserved) * i.allocation_ratio) >=
                COALESCE((SELECT SUM(ai.used)
                          FROM allocation_items AS ai
                          JOIN allocations AS a ON ai.allocation_id = a.id
                          WHERE ai.provider_id = i.provider_id
                            AND ai.resource_class_id = i.resource_class_id
                            AND a.claim_time < ?3
                            AND a.release_time > ?4), 0)
         FROM inventories AS i
         WHERE i.provider_id = ?1 AND i.resource_class_id = ?2",
        params![
            provider_id,
            resource_class_id,
            window.release_time.unix_seconds(),
            window.claim_time.unix_seconds()
        ],
        |row| row.get::<_, bool>(0),
    )
    .optional()
    .map_err(map_sqlite_error)
}

// ============================================================================
// SECTION: Candidate Queries
// ============================================================================

impl CatalogQueries for SqliteCatalog {
    /// Capacity-in-window candidates, optionally composed with a
    /// resource-scoped capability clause. The generated shape is:
    ///
    /// ```sql
    /// SELECT DISTINCT p.id, p.uuid
    /// FROM providers AS p
    /// JOIN inventories AS i
    ///   ON p.id = i.provider_id AND i.resource_class_id = :rc
    /// -- optional capability joins (require / any / forbid)
    /// LEFT JOIN (SELECT ai.provider_id, SUM(ai.used) AS total_used
    ///            FROM allocation_items AS ai
    ///            JOIN allocations AS a ON ai.allocation_id = a.id
    ///            WHERE ai.resource_class_id = :rc
    ///              AND a.claim_time < :release AND a.release_time > :claim
    ///            GROUP BY ai.provider_id) AS usages
    ///   ON usages.provider_id = p.id
    /// WHERE ((i.total - i.reserved) * i.allocation_ratio)
    ///       >= :amount + COALESCE(usages.total_used, 0)
    /// ORDER BY p.id ASC LIMIT :limit
    /// ```
    ///
    /// Usage sums over allocations whose window OVERLAPS the request
    /// window, not just those contained in it.
    fn providers_with_capacity(
        &self,
        query: &CapacityQuery,
    ) -> Result<Vec<ProviderIdentity>, CatalogError> {
        let resource_class = id_to_db(query.resource_class.get())?;
        let mut sql = String::from(
            "SELECT DISTINCT p.id, p.uuid \
             FROM providers AS p \
             JOIN inventories AS i \
               ON p.id = i.provider_id AND i.resource_class_id = ?",
        );
        let mut params: Vec<Value> = vec![Value::Integer(resource_class)];
        let mut has_forbid = false;
        if let Some(capabilities) = &query.capabilities {
            append_capability_joins(&mut sql, &mut params, capabilities, &mut has_forbid)?;
        }
        sql.push_str(
            " LEFT JOIN (SELECT ai.provider_id AS provider_id, SUM(ai.used) AS total_used \
               FROM allocation_items AS ai \
               JOIN allocations AS a ON ai.allocation_id = a.id \
               WHERE ai.resource_class_id = ? \
                 AND a.claim_time < ? \
                 AND a.release_time > ? \
               GROUP BY ai.provider_id) AS usages \
              ON usages.provider_id = p.id",
        );
        params.push(Value::Integer(resource_class));
        params.push(Value::Integer(query.window.release_time.unix_seconds()));
        params.push(Value::Integer(query.window.claim_time.unix_seconds()));
        sql.push_str(
            " WHERE ((i.total - i.reserved) * i.allocation_ratio) \
              >= (? + COALESCE(usages.total_used, 0))",
        );
        params.push(Value::Integer(amount_to_db(query.amount)?));
        if has_forbid {
            sql.push_str(" AND pc_forbid.capability_id IS NULL");
        }
        push_exclusion(&mut sql, &mut params, "AND", &query.exclude)?;
        sql.push_str(" ORDER BY p.id ASC");
        push_limit(&mut sql, &mut params, query.limit)?;
        self.run_candidate_query(&sql, params)
    }

    /// Providers holding ALL of the supplied capabilities:
    ///
    /// ```sql
    /// SELECT p.id, p.uuid FROM providers AS p
    /// JOIN provider_capabilities AS pc ON p.id = pc.provider_id
    /// WHERE pc.capability_id IN (:caps)
    /// GROUP BY p.id, p.uuid
    /// HAVING COUNT(DISTINCT pc.capability_id) = :n
    /// ORDER BY p.id ASC LIMIT :limit
    /// ```
    fn providers_with_all_capabilities(
        &self,
        require: &[CapabilityId],
        exclude: &[ProviderId],
        limit: usize,
    ) -> Result<Vec<ProviderIdentity>, CatalogError> {
        if require.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT p.id, p.uuid \
             FROM providers AS p \
             JOIN provider_capabilities AS pc ON p.id = pc.provider_id \
             WHERE pc.capability_id IN ({})",
            placeholders(require.len())
        );
        let mut params: Vec<Value> = Vec::new();
        push_capability_ids(&mut params, require)?;
        push_exclusion(&mut sql, &mut params, "AND", exclude)?;
        sql.push_str(" GROUP BY p.id, p.uuid HAVING COUNT(DISTINCT pc.capability_id) = ?");
        params.push(Value::Integer(count_to_db(require.len())?));
        sql.push_str(" ORDER BY p.id ASC");
        push_limit(&mut sql, &mut params, limit)?;
        self.run_candidate_query(&sql, params)
    }

    /// Providers holding ANY of the supplied capabilities (distinct).
    fn providers_with_any_capabilities(
        &self,
        any: &[CapabilityId],
        exclude: &[ProviderId],
        limit: usize,
    ) -> Result<Vec<ProviderIdentity>, CatalogError> {
        if any.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT DISTINCT p.id, p.uuid \
             FROM providers AS p \
             JOIN provider_capabilities AS pc ON p.id = pc.provider_id \
             WHERE pc.capability_id IN ({})",
            placeholders(any.len())
        );
        let mut params: Vec<Value> = Vec::new();
        push_capability_ids(&mut params, any)?;
        push_exclusion(&mut sql, &mut params, "AND", exclude)?;
        sql.push_str(" ORDER BY p.id ASC");
        push_limit(&mut sql, &mut params, limit)?;
        self.run_candidate_query(&sql, params)
    }

    /// Providers in ALL `require` groups and at least one `any` group.
    fn providers_in_groups(
        &self,
        query: &GroupMembershipQuery,
    ) -> Result<Vec<ProviderIdentity>, CatalogError> {
        if query.require.is_empty() && query.any.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = String::from("SELECT p.id, p.uuid FROM providers AS p");
        let mut params: Vec<Value> = Vec::new();
        if !query.require.is_empty() {
            sql.push_str(&format!(
                " JOIN (SELECT provider_id FROM provider_group_members \
                  WHERE group_id IN ({}) \
                  GROUP BY provider_id \
                  HAVING COUNT(DISTINCT group_id) = ?) AS groups_all \
                  ON groups_all.provider_id = p.id",
                placeholders(query.require.len())
            ));
            for id in &query.require {
                params.push(Value::Integer(id_to_db(id.get())?));
            }
            params.push(Value::Integer(count_to_db(query.require.len())?));
        }
        if !query.any.is_empty() {
            sql.push_str(&format!(
                " JOIN (SELECT DISTINCT provider_id FROM provider_group_members \
                  WHERE group_id IN ({})) AS groups_any \
                  ON groups_any.provider_id = p.id",
                placeholders(query.any.len())
            ));
            for id in &query.any {
                params.push(Value::Integer(id_to_db(id.get())?));
            }
        }
        push_exclusion(&mut sql, &mut params, "WHERE", &query.exclude)?;
        sql.push_str(" ORDER BY p.id ASC");
        push_limit(&mut sql, &mut params, query.limit)?;
        self.run_candidate_query(&sql, params)
    }

    /// Providers in at least one of the supplied groups (exclusion set for
    /// forbidden groups; unbounded by default).
    fn providers_in_any_group(
        &self,
        groups: &[ProviderGroupId],
        limit: usize,
    ) -> Result<Vec<ProviderIdentity>, CatalogError> {
        if groups.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT DISTINCT p.id, p.uuid \
             FROM providers AS p \
             JOIN provider_group_members AS m ON m.provider_id = p.id \
             WHERE m.group_id IN ({})",
            placeholders(groups.len())
        );
        let mut params: Vec<Value> = Vec::new();
        for id in groups {
            params.push(Value::Integer(id_to_db(id.get())?));
        }
        sql.push_str(" ORDER BY p.id ASC");
        push_limit(&mut sql, &mut params, limit)?;
        self.run_candidate_query(&sql, params)
    }

    /// Providers whose distance edge to some group containing the reference
    /// provider falls inside the position band:
    ///
    /// ```sql
    /// SELECT DISTINCT p.id, p.uuid
    /// FROM providers AS p
    /// JOIN provider_distances AS pd ON pd.provider_id = p.id
    /// JOIN distances AS d ON d.id = pd.distance_id AND d.type_id = :t
    /// JOIN provider_group_members AS ref_m
    ///   ON ref_m.group_id = pd.group_id AND ref_m.provider_id = :ref
    /// WHERE d.position BETWEEN :min AND :max
    /// ORDER BY p.id ASC LIMIT :limit
    /// ```
    fn providers_within_distance(
        &self,
        query: &DistanceQuery,
    ) -> Result<Vec<ProviderIdentity>, CatalogError> {
        let mut sql = String::from(
            "SELECT DISTINCT p.id, p.uuid \
             FROM providers AS p \
             JOIN provider_distances AS pd ON pd.provider_id = p.id \
             JOIN distances AS d ON d.id = pd.distance_id AND d.type_id = ? \
             JOIN provider_group_members AS ref_m \
               ON ref_m.group_id = pd.group_id AND ref_m.provider_id = ? \
             WHERE d.position BETWEEN ? AND ?",
        );
        let mut params: Vec<Value> = vec![
            Value::Integer(id_to_db(query.distance_type.get())?),
            Value::Integer(id_to_db(query.reference.get())?),
            Value::Integer(i64::from(query.min_position)),
            Value::Integer(i64::from(query.max_position)),
        ];
        push_exclusion(&mut sql, &mut params, "AND", &query.exclude)?;
        sql.push_str(" ORDER BY p.id ASC");
        push_limit(&mut sql, &mut params, query.limit)?;
        self.run_candidate_query(&sql, params)
    }

    fn provider_identity_by_uuid(
        &self,
        uuid: &Uuid,
    ) -> Result<Option<ProviderIdentity>, CatalogError> {
        let guard = lock_connection(self.read_connection())?;
        let row = guard
            .query_row(
                "SELECT id, uuid FROM providers WHERE uuid = ?1",
                params![uuid.as_str()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(map_sqlite_error)?;
        row.map(|(id, uuid)| {
            Ok(ProviderIdentity {
                id: provider_id_from_db(id)?,
                uuid: Uuid::new(uuid),
            })
        })
        .transpose()
    }
}

/// Appends the resource-scoped capability joins onto a capacity query.
///
/// One required capability collapses to a direct join; several use a
/// grouped derived table; `any`/`forbid` fold into join ON clauses with the
/// forbid branch finished by an `IS NULL` filter in the outer WHERE.
fn append_capability_joins(
    sql: &mut String,
    params: &mut Vec<Value>,
    capabilities: &ResolvedCapabilityConstraint,
    has_forbid: &mut bool,
) -> Result<(), CatalogError> {
    if capabilities.require.len() == 1 {
        sql.push_str(
            " JOIN provider_capabilities AS pc_req \
              ON pc_req.provider_id = p.id AND pc_req.capability_id = ?",
        );
        push_capability_ids(params, &capabilities.require)?;
    } else if capabilities.require.len() > 1 {
        sql.push_str(&format!(
            " JOIN (SELECT provider_id FROM provider_capabilities \
              WHERE capability_id IN ({}) \
              GROUP BY provider_id \
              HAVING COUNT(DISTINCT capability_id) = ?) AS caps_all \
              ON caps_all.provider_id = p.id",
            placeholders(capabilities.require.len())
        ));
        push_capability_ids(params, &capabilities.require)?;
        params.push(Value::Integer(count_to_db(capabilities.require.len())?));
    }
    if !capabilities.any.is_empty() {
        sql.push_str(&format!(
            " JOIN provider_capabilities AS pc_any \
              ON pc_any.provider_id = p.id AND pc_any.capability_id IN ({})",
            placeholders(capabilities.any.len())
        ));
        push_capability_ids(params, &capabilities.any)?;
    }
    if !capabilities.forbid.is_empty() {
        sql.push_str(&format!(
            " LEFT JOIN provider_capabilities AS pc_forbid \
              ON pc_forbid.provider_id = p.id AND pc_forbid.capability_id IN ({})",
            placeholders(capabilities.forbid.len())
        ));
        push_capability_ids(params, &capabilities.forbid)?;
        *has_forbid = true;
    }
    Ok(())
}

// ============================================================================
// SECTION: Catalog Store
// ============================================================================

impl CatalogStore for SqliteCatalog {
    fn seed(&self, seed: &CatalogSeed) -> Result<(), CatalogError> {
        let mut guard = lock_connection(&self.write_connection)?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_sqlite_error)?;
        for resource_class in &seed.resource_classes {
            tx.execute(
                "INSERT OR IGNORE INTO resource_classes (code, description) VALUES (?1, ?2)",
                params![resource_class.code.as_str(), resource_class.description],
            )
            .map_err(map_sqlite_error)?;
        }
        for capability in &seed.capabilities {
            tx.execute(
                "INSERT OR IGNORE INTO capabilities (code, description) VALUES (?1, ?2)",
                params![capability.code.as_str(), capability.description],
            )
            .map_err(map_sqlite_error)?;
        }
        for distance_type in &seed.distance_types {
            tx.execute(
                "INSERT OR IGNORE INTO distance_types (code) VALUES (?1)",
                params![distance_type.code.as_str()],
            )
            .map_err(map_sqlite_error)?;
            let type_id: i64 = tx
                .query_row(
                    "SELECT id FROM distance_types WHERE code = ?1",
                    params![distance_type.code.as_str()],
                    |row| row.get(0),
                )
                .map_err(map_sqlite_error)?;
            for (position, distance) in distance_type.distances.iter().enumerate() {
                tx.execute(
                    "INSERT OR IGNORE INTO distances (type_id, code, position) VALUES (?1, ?2, ?3)",
                    params![type_id, distance.as_str(), count_to_db(position)?],
                )
                .map_err(map_sqlite_error)?;
            }
        }
        tx.commit().map_err(map_sqlite_error)
    }

    fn register_partition(&self, name: &str, uuid: &Uuid) -> Result<Partition, CatalogError> {
        let mut guard = lock_connection(&self.write_connection)?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_sqlite_error)?;
        let existing: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, name FROM partitions WHERE uuid = ?1",
                params![uuid.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(map_sqlite_error)?;
        let (id, name) = if let Some((id, stored_name)) = existing {
            (id, stored_name)
        } else {
            tx.execute(
                "INSERT INTO partitions (uuid, name) VALUES (?1, ?2)",
                params![uuid.as_str(), name],
            )
            .map_err(map_sqlite_error)?;
            (tx.last_insert_rowid(), name.to_string())
        };
        tx.commit().map_err(map_sqlite_error)?;
        Ok(Partition {
            id: partition_id_from_db(id)?,
            uuid: uuid.clone(),
            name,
        })
    }

    fn register_provider_group(
        &self,
        name: &str,
        uuid: &Uuid,
    ) -> Result<ProviderGroup, CatalogError> {
        let mut guard = lock_connection(&self.write_connection)?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_sqlite_error)?;
        let existing: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, name FROM provider_groups WHERE uuid = ?1",
                params![uuid.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(map_sqlite_error)?;
        let (id, name) = if let Some((id, stored_name)) = existing {
            (id, stored_name)
        } else {
            tx.execute(
                "INSERT INTO provider_groups (uuid, name) VALUES (?1, ?2)",
                params![uuid.as_str(), name],
            )
            .map_err(map_sqlite_error)?;
            (tx.last_insert_rowid(), name.to_string())
        };
        tx.commit().map_err(map_sqlite_error)?;
        Ok(ProviderGroup {
            id: group_id_from_db(id)?,
            uuid: uuid.clone(),
            name,
        })
    }

    fn register_provider(
        &self,
        registration: &ProviderRegistration,
    ) -> Result<Provider, CatalogError> {
        for inventory in &registration.inventories {
            inventory
                .validate()
                .map_err(|err| CatalogError::InvalidInventory(err.to_string()))?;
        }
        let mut guard = lock_connection(&self.write_connection)?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_sqlite_error)?;
        let duplicate: Option<i64> = tx
            .query_row(
                "SELECT id FROM providers WHERE uuid = ?1",
                params![registration.uuid.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_sqlite_error)?;
        if duplicate.is_some() {
            return Err(CatalogError::Conflict(format!(
                "provider uuid {} already registered",
                registration.uuid
            )));
        }
        let partition_id: i64 = tx
            .query_row(
                "SELECT id FROM partitions WHERE uuid = ?1",
                params![registration.partition.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_sqlite_error)?
            .ok_or_else(|| CatalogError::NotFound(format!("partition {}", registration.partition)))?;
        tx.execute(
            "INSERT INTO providers (uuid, name, partition_id, generation) VALUES (?1, ?2, ?3, 1)",
            params![registration.uuid.as_str(), registration.name, partition_id],
        )
        .map_err(map_sqlite_error)?;
        let provider_id = tx.last_insert_rowid();
        for inventory in &registration.inventories {
            insert_inventory(&tx, provider_id, inventory)?;
        }
        for capability in &registration.capabilities {
            let capability_id = lookup_capability(&tx, capability)?;
            tx.execute(
                "INSERT INTO provider_capabilities (provider_id, capability_id) VALUES (?1, ?2)",
                params![provider_id, capability_id],
            )
            .map_err(map_sqlite_error)?;
        }
        for group in &registration.groups {
            let group_id = lookup_group(&tx, group)?;
            tx.execute(
                "INSERT INTO provider_group_members (provider_id, group_id) VALUES (?1, ?2)",
                params![provider_id, group_id],
            )
            .map_err(map_sqlite_error)?;
        }
        for distance in &registration.distances {
            let group_id = lookup_group(&tx, &distance.group)?;
            let distance_id = lookup_distance(&tx, &distance.distance_type, &distance.distance)?;
            tx.execute(
                "INSERT INTO provider_distances (provider_id, group_id, distance_id) \
                 VALUES (?1, ?2, ?3)",
                params![provider_id, group_id, distance_id],
            )
            .map_err(map_sqlite_error)?;
        }
        tx.commit().map_err(map_sqlite_error)?;
        self.record(|stats| stats.registrations += 1);
        Ok(Provider {
            id: provider_id_from_db(provider_id)?,
            uuid: registration.uuid.clone(),
            name: registration.name.clone(),
            partition_id: partition_id_from_db(partition_id)?,
            generation: 1,
        })
    }

    fn replace_inventory(
        &self,
        provider: &Uuid,
        inventories: &[Inventory],
    ) -> Result<Provider, CatalogError> {
        for inventory in inventories {
            inventory
                .validate()
                .map_err(|err| CatalogError::InvalidInventory(err.to_string()))?;
        }
        let mut guard = lock_connection(&self.write_connection)?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_sqlite_error)?;
        let row: Option<(i64, String, i64, i64)> = tx
            .query_row(
                "SELECT id, name, partition_id, generation FROM providers WHERE uuid = ?1",
                params![provider.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .map_err(map_sqlite_error)?;
        let Some((provider_id, name, partition_id, generation)) = row else {
            return Err(CatalogError::NotFound(format!("provider {provider}")));
        };
        tx.execute("DELETE FROM inventories WHERE provider_id = ?1", params![provider_id])
            .map_err(map_sqlite_error)?;
        for inventory in inventories {
            insert_inventory(&tx, provider_id, inventory)?;
        }
        let generation = generation.saturating_add(1);
        tx.execute(
            "UPDATE providers SET generation = ?1 WHERE id = ?2",
            params![generation, provider_id],
        )
        .map_err(map_sqlite_error)?;
        tx.commit().map_err(map_sqlite_error)?;
        Ok(Provider {
            id: provider_id_from_db(provider_id)?,
            uuid: provider.clone(),
            name,
            partition_id: partition_id_from_db(partition_id)?,
            generation: u64::try_from(generation)
                .map_err(|_| CatalogError::Db(format!("invalid generation {generation}")))?,
        })
    }

    fn provider_by_uuid(&self, uuid: &Uuid) -> Result<Option<Provider>, CatalogError> {
        let guard = lock_connection(self.read_connection())?;
        let row: Option<(i64, String, i64, i64)> = guard
            .query_row(
                "SELECT id, name, partition_id, generation FROM providers WHERE uuid = ?1",
                params![uuid.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .map_err(map_sqlite_error)?;
        row.map(|(id, name, partition_id, generation)| {
            Ok(Provider {
                id: provider_id_from_db(id)?,
                uuid: uuid.clone(),
                name,
                partition_id: partition_id_from_db(partition_id)?,
                generation: u64::try_from(generation)
                    .map_err(|_| CatalogError::Db(format!("invalid generation {generation}")))?,
            })
        })
        .transpose()
    }

    fn persist_allocation(
        &self,
        allocation: &Allocation,
    ) -> Result<AllocationReceipt, CatalogError> {
        let mut guard = lock_connection(&self.write_connection)?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| {
                let mapped = map_sqlite_error(err);
                if matches!(mapped, CatalogError::Retryable(_)) {
                    self.record(|stats| stats.busy_errors += 1);
                }
                mapped
            })?;
        let consumer_uuid = allocation
            .consumer
            .uuid
            .clone()
            .unwrap_or_else(|| Uuid::new(allocation.consumer.name.clone()));
        let consumer_id: i64 = {
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM consumers WHERE uuid = ?1",
                    params![consumer_uuid.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(map_sqlite_error)?;
            if let Some(id) = existing {
                id
            } else {
                tx.execute(
                    "INSERT INTO consumers (uuid, name, project, user) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        consumer_uuid.as_str(),
                        allocation.consumer.name,
                        allocation.consumer.project,
                        allocation.consumer.user
                    ],
                )
                .map_err(map_sqlite_error)?;
                tx.last_insert_rowid()
            }
        };
        tx.execute(
            "INSERT INTO allocations (consumer_id, claim_time, release_time) VALUES (?1, ?2, ?3)",
            params![
                consumer_id,
                allocation.window.claim_time.unix_seconds(),
                allocation.window.release_time.unix_seconds()
            ],
        )
        .map_err(map_sqlite_error)?;
        let allocation_id = tx.last_insert_rowid();
        let mut touched: BTreeMap<(i64, i64), (Uuid, ResourceClassCode)> = BTreeMap::new();
        for item in &allocation.items {
            let provider_id = id_to_db(item.provider.id.get())?;
            let resource_class_id = lookup_resource_class(&tx, &item.resource_class)?;
            tx.execute(
                "INSERT INTO allocation_items \
                 (allocation_id, provider_id, resource_class_id, used) VALUES (?1, ?2, ?3, ?4)",
                params![allocation_id, provider_id, resource_class_id, amount_to_db(item.used)?],
            )
            .map_err(map_sqlite_error)?;
            touched.insert(
                (provider_id, resource_class_id),
                (item.provider.uuid.clone(), item.resource_class.clone()),
            );
        }
        // Last step before commit: re-evaluate the capacity invariant for
        // every inventory row the new items touch.
        for ((provider_id, resource_class_id), (provider_uuid, resource_class)) in &touched {
            let holds =
                capacity_holds(&tx, *provider_id, *resource_class_id, &allocation.window)?;
            if holds != Some(true) {
                self.record(|stats| stats.capacity_rejections += 1);
                return Err(CatalogError::CapacityExceeded {
                    provider: provider_uuid.clone(),
                    resource_class: resource_class.clone(),
                });
            }
        }
        tx.commit().map_err(|err| {
            let mapped = map_sqlite_error(err);
            if matches!(mapped, CatalogError::Retryable(_)) {
                self.record(|stats| stats.busy_errors += 1);
            }
            mapped
        })?;
        self.record(|stats| stats.allocations_persisted += 1);
        let allocation_id = u64::try_from(allocation_id)
            .ok()
            .and_then(AllocationId::from_raw)
            .ok_or_else(|| CatalogError::Db(format!("invalid allocation id {allocation_id}")))?;
        Ok(AllocationReceipt { allocation_id })
    }

    fn load_metadata(&self) -> Result<CatalogMetadata, CatalogError> {
        let guard = lock_connection(self.read_connection())?;
        let mut metadata = CatalogMetadata::default();
        collect_code_map(&guard, "SELECT code, id FROM resource_classes", |code, id| {
            let id = ResourceClassId::from_raw(id)
                .ok_or_else(|| CatalogError::Db("zero resource class id".to_string()))?;
            metadata.resource_classes.insert(ResourceClassCode::new(code), id);
            Ok(())
        })?;
        collect_code_map(&guard, "SELECT code, id FROM capabilities", |code, id| {
            let id = CapabilityId::from_raw(id)
                .ok_or_else(|| CatalogError::Db("zero capability id".to_string()))?;
            metadata.capabilities.insert(CapabilityCode::new(code), id);
            Ok(())
        })?;
        collect_code_map(&guard, "SELECT code, id FROM distance_types", |code, id| {
            let id = DistanceTypeId::from_raw(id)
                .ok_or_else(|| CatalogError::Db("zero distance type id".to_string()))?;
            metadata.distance_types.insert(DistanceTypeCode::new(code), id);
            Ok(())
        })?;
        collect_code_map(&guard, "SELECT name, id FROM provider_groups", |name, id| {
            let id = ProviderGroupId::from_raw(id)
                .ok_or_else(|| CatalogError::Db("zero provider group id".to_string()))?;
            metadata.provider_groups.insert(name, id);
            Ok(())
        })?;
        let mut stmt = guard
            .prepare(
                "SELECT t.code, d.code, d.position \
                 FROM distances AS d \
                 JOIN distance_types AS t ON d.type_id = t.id",
            )
            .map_err(map_sqlite_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
            })
            .map_err(map_sqlite_error)?;
        for row in rows {
            let (type_code, distance_code, position) = row.map_err(map_sqlite_error)?;
            let position = u32::try_from(position)
                .map_err(|_| CatalogError::Db(format!("invalid distance position {position}")))?;
            metadata.distance_positions.insert(
                (DistanceTypeCode::new(type_code), DistanceCode::new(distance_code)),
                position,
            );
        }
        Ok(metadata)
    }

    fn usage_in_window(
        &self,
        provider: ProviderId,
        resource_class: ResourceClassId,
        window: &ClaimWindow,
    ) -> Result<u64, CatalogError> {
        let guard = lock_connection(self.read_connection())?;
        let used: i64 = guard
            .query_row(
                "SELECT COALESCE(SUM(ai.used), 0) \
                 FROM allocation_items AS ai \
                 JOIN allocations AS a ON ai.allocation_id = a.id \
                 WHERE ai.provider_id = ?1 \
                   AND ai.resource_class_id = ?2 \
                   AND a.claim_time < ?3 \
                   AND a.release_time > ?4",
                params![
                    id_to_db(provider.get())?,
                    id_to_db(resource_class.get())?,
                    window.release_time.unix_seconds(),
                    window.claim_time.unix_seconds()
                ],
                |row| row.get(0),
            )
            .map_err(map_sqlite_error)?;
        u64::try_from(used).map_err(|_| CatalogError::Db(format!("negative usage sum {used}")))
    }
}

// ============================================================================
// SECTION: Row Helpers
// ============================================================================

/// Converts a database row id into a partition id.
fn partition_id_from_db(raw: i64) -> Result<PartitionId, CatalogError> {
    u64::try_from(raw)
        .ok()
        .and_then(PartitionId::from_raw)
        .ok_or_else(|| CatalogError::Db(format!("invalid partition id {raw}")))
}

/// Converts a database row id into a provider group id.
fn group_id_from_db(raw: i64) -> Result<ProviderGroupId, CatalogError> {
    u64::try_from(raw)
        .ok()
        .and_then(ProviderGroupId::from_raw)
        .ok_or_else(|| CatalogError::Db(format!("invalid provider group id {raw}")))
}

/// Inserts one inventory row for a provider.
fn insert_inventory(
    tx: &Transaction<'_>,
    provider_id: i64,
    inventory: &Inventory,
) -> Result<(), CatalogError> {
    let resource_class_id = lookup_resource_class(tx, &inventory.resource_class)?;
    tx.execute(
        "INSERT INTO inventories \
         (provider_id, resource_class_id, total, reserved, min_unit, max_unit, step_size, \
          allocation_ratio) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            provider_id,
            resource_class_id,
            amount_to_db(inventory.total)?,
            amount_to_db(inventory.reserved)?,
            amount_to_db(inventory.min_unit)?,
            amount_to_db(inventory.max_unit)?,
            amount_to_db(inventory.step_size)?,
            inventory.allocation_ratio
        ],
    )
    .map_err(map_sqlite_error)?;
    Ok(())
}

/// Runs a two-column `(text, id)` query feeding a map-building closure.
fn collect_code_map<F>(
    connection: &Connection,
    sql: &str,
    mut insert: F,
) -> Result<(), CatalogError>
where
    F: FnMut(String, u64) -> Result<(), CatalogError>,
{
    let mut stmt = connection.prepare(sql).map_err(map_sqlite_error)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
        .map_err(map_sqlite_error)?;
    for row in rows {
        let (code, id) = row.map_err(map_sqlite_error)?;
        let id = u64::try_from(id).map_err(|_| CatalogError::Db(format!("invalid id {id}")))?;
        insert(code, id)?;
    }
    Ok(())
}
