use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::caller::Role;
use super::models::*;
use crate::errors::RoadworksError;

/// Async-safe handle to the roadworks database.
///
/// Wraps `RoadworksDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads. Units of work are serialised per process.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<RoadworksDb>>,
}

impl DbHandle {
    pub fn new(db: RoadworksDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R, RoadworksError>
    where
        F: FnOnce(&RoadworksDb) -> Result<R, RoadworksError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| RoadworksError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Used for startup
    /// initialization and tests; never from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, RoadworksDb>, RoadworksError> {
        self.inner.lock().map_err(|_| RoadworksError::LockPoisoned)
    }
}

pub struct RoadworksDb {
    conn: Connection,
}

impl RoadworksDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    uuid TEXT PRIMARY KEY,
                    display_name TEXT NOT NULL,
                    org_unit TEXT NOT NULL DEFAULT '',
                    roles TEXT NOT NULL DEFAULT '[]',
                    active INTEGER NOT NULL DEFAULT 1
                );

                CREATE TABLE IF NOT EXISTS activities (
                    uuid TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    project_no TEXT,
                    activity_no TEXT,
                    project_manager TEXT,
                    traffic_agent TEXT,
                    project_type TEXT,
                    section TEXT,
                    involved_users TEXT NOT NULL DEFAULT '[]',
                    geometry TEXT NOT NULL,
                    milestones TEXT NOT NULL,
                    phase_entered TEXT NOT NULL DEFAULT '{}',
                    costs REAL,
                    cost_type TEXT,
                    cost_last_modified TEXT,
                    cost_last_modified_by TEXT,
                    status TEXT NOT NULL DEFAULT 'review',
                    is_private INTEGER NOT NULL DEFAULT 1,
                    is_study INTEGER NOT NULL DEFAULT 0,
                    created TEXT NOT NULL,
                    last_modified TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS needs (
                    uuid TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    orderer TEXT NOT NULL,
                    priority TEXT NOT NULL DEFAULT 'middle',
                    geometry TEXT NOT NULL,
                    finish_early_to TEXT NOT NULL,
                    finish_optimum_to TEXT NOT NULL,
                    finish_late_to TEXT NOT NULL,
                    is_private INTEGER NOT NULL DEFAULT 1,
                    costs TEXT NOT NULL DEFAULT '[]',
                    has_sponge_city_measures INTEGER NOT NULL DEFAULT 0,
                    sponge_city_measures TEXT NOT NULL DEFAULT '[]',
                    status TEXT NOT NULL DEFAULT 'requirement',
                    delete_reason TEXT,
                    created TEXT NOT NULL,
                    last_modified TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS activity_needs (
                    need_uuid TEXT NOT NULL REFERENCES needs(uuid) ON DELETE CASCADE,
                    activity_uuid TEXT NOT NULL REFERENCES activities(uuid) ON DELETE CASCADE,
                    relation_type TEXT NOT NULL,
                    is_primary INTEGER NOT NULL DEFAULT 0,
                    created TEXT NOT NULL,
                    PRIMARY KEY (need_uuid, activity_uuid)
                );

                CREATE TABLE IF NOT EXISTS activity_history (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    activity_uuid TEXT NOT NULL REFERENCES activities(uuid) ON DELETE CASCADE,
                    changed TEXT NOT NULL,
                    who TEXT NOT NULL,
                    what TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS consultations (
                    uuid TEXT PRIMARY KEY,
                    activity_uuid TEXT NOT NULL REFERENCES activities(uuid) ON DELETE CASCADE,
                    need_uuid TEXT REFERENCES needs(uuid) ON DELETE SET NULL,
                    input_by TEXT NOT NULL,
                    phase TEXT NOT NULL,
                    decline INTEGER NOT NULL DEFAULT 0,
                    feedback_given INTEGER NOT NULL DEFAULT 0,
                    orderer_feedback TEXT NOT NULL DEFAULT '',
                    manager_feedback TEXT NOT NULL DEFAULT '',
                    valuation INTEGER NOT NULL DEFAULT 0,
                    last_edit TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS management_areas (
                    uuid TEXT PRIMARY KEY,
                    manager TEXT NOT NULL,
                    name TEXT NOT NULL DEFAULT '',
                    geometry TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS addresses (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    street TEXT NOT NULL,
                    house_number TEXT,
                    x REAL NOT NULL,
                    y REAL NOT NULL
                );

                CREATE TABLE IF NOT EXISTS activity_numbers (
                    year INTEGER PRIMARY KEY,
                    last_seq INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_activities_status ON activities(status);
                CREATE INDEX IF NOT EXISTS idx_needs_orderer ON needs(orderer);
                CREATE INDEX IF NOT EXISTS idx_activity_needs_activity ON activity_needs(activity_uuid);
                CREATE INDEX IF NOT EXISTS idx_activity_history_activity ON activity_history(activity_uuid);
                CREATE INDEX IF NOT EXISTS idx_consultations_activity ON consultations(activity_uuid);
                CREATE INDEX IF NOT EXISTS idx_management_areas_manager ON management_areas(manager);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    /// Store bound to the plain connection, for reads outside a unit of work.
    pub fn store(&self) -> Store<'_> {
        Store::new(&self.conn)
    }

    /// Run `unit_of_work` atomically. Any `Err` rolls back every write the
    /// closure made; nothing of a failed operation is ever observable.
    pub fn run_in_transaction<T, F>(&self, unit_of_work: F) -> Result<T, RoadworksError>
    where
        F: FnOnce(&Store<'_>) -> Result<T, RoadworksError>,
    {
        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let value = unit_of_work(&Store::new(&tx))?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(value)
    }
}

/// Row-level access to every table. Bound either to the connection or to an
/// open transaction.
pub struct Store<'c> {
    conn: &'c Connection,
}

const ACTIVITY_COLUMNS: &str = "uuid, name, description, project_no, activity_no, project_manager, traffic_agent, project_type, section, involved_users, geometry, milestones, phase_entered, costs, cost_type, cost_last_modified, cost_last_modified_by, status, is_private, is_study, created, last_modified";

const NEED_COLUMNS: &str = "uuid, name, description, orderer, priority, geometry, finish_early_to, finish_optimum_to, finish_late_to, is_private, costs, has_sponge_city_measures, sponge_city_measures, status, delete_reason, created, last_modified";

const CONSULTATION_COLUMNS: &str = "uuid, activity_uuid, need_uuid, input_by, phase, decline, feedback_given, orderer_feedback, manager_feedback, valuation, last_edit";

impl<'c> Store<'c> {
    fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO users (uuid, display_name, org_unit, roles, active)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(uuid) DO UPDATE SET
                    display_name = excluded.display_name,
                    org_unit = excluded.org_unit,
                    roles = excluded.roles,
                    active = excluded.active",
                params![
                    user.uuid.to_string(),
                    user.display_name,
                    user.org_unit,
                    to_json(&user.roles)?,
                    user.active,
                ],
            )
            .context("Failed to upsert user")?;
        Ok(())
    }

    pub fn get_user(&self, uuid: Uuid) -> Result<Option<User>> {
        let row = self
            .conn
            .query_row(
                "SELECT uuid, display_name, org_unit, roles, active FROM users WHERE uuid = ?1",
                params![uuid.to_string()],
                UserRow::read,
            )
            .optional()
            .context("Failed to query user")?;
        row.map(UserRow::into_user).transpose()
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare("SELECT uuid, display_name, org_unit, roles, active FROM users ORDER BY display_name")
            .context("Failed to prepare list_users")?;
        let rows = stmt.query_map([], UserRow::read).context("Failed to query users")?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row.context("Failed to read user row")?.into_user()?);
        }
        Ok(users)
    }

    /// Display name for history entries; unknown users show their uuid.
    pub fn display_name(&self, uuid: Uuid) -> Result<String> {
        Ok(self
            .get_user(uuid)?
            .map(|u| u.display_name)
            .unwrap_or_else(|| uuid.to_string()))
    }

    // ── Reference data ────────────────────────────────────────────────

    pub fn insert_management_area(&self, area: &ManagementArea) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO management_areas (uuid, manager, name, geometry) VALUES (?1, ?2, ?3, ?4)",
                params![
                    area.uuid.to_string(),
                    area.manager.to_string(),
                    area.name,
                    to_json(&area.geometry)?,
                ],
            )
            .context("Failed to insert management area")?;
        Ok(())
    }

    pub fn management_areas_of(&self, manager: Uuid) -> Result<Vec<ManagementArea>> {
        let mut stmt = self
            .conn
            .prepare("SELECT uuid, manager, name, geometry FROM management_areas WHERE manager = ?1")
            .context("Failed to prepare management_areas_of")?;
        let rows = stmt
            .query_map(params![manager.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .context("Failed to query management areas")?;
        let mut areas = Vec::new();
        for row in rows {
            let (uuid, manager, name, geometry) = row.context("Failed to read management area row")?;
            areas.push(ManagementArea {
                uuid: parse_uuid(&uuid)?,
                manager: parse_uuid(&manager)?,
                name,
                geometry: from_json(&geometry, "management area geometry")?,
            });
        }
        Ok(areas)
    }

    pub fn insert_address(&self, address: &Address) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO addresses (street, house_number, x, y) VALUES (?1, ?2, ?3, ?4)",
                params![address.street, address.house_number, address.x, address.y],
            )
            .context("Failed to insert address")?;
        Ok(())
    }

    pub fn nearest_address(&self, x: f64, y: f64) -> Result<Option<Address>> {
        self.conn
            .query_row(
                "SELECT street, house_number, x, y FROM addresses
                 ORDER BY (x - ?1) * (x - ?1) + (y - ?2) * (y - ?2), id
                 LIMIT 1",
                params![x, y],
                |row| {
                    Ok(Address {
                        street: row.get(0)?,
                        house_number: row.get(1)?,
                        x: row.get(2)?,
                        y: row.get(3)?,
                    })
                },
            )
            .optional()
            .context("Failed to query nearest address")
    }

    /// Next activity number for `year`, formatted `<year>.<seq:03>`.
    pub fn next_activity_number(&self, year: i32) -> Result<String> {
        self.conn
            .execute(
                "INSERT INTO activity_numbers (year, last_seq) VALUES (?1, 1)
                 ON CONFLICT(year) DO UPDATE SET last_seq = last_seq + 1",
                params![year],
            )
            .context("Failed to advance activity number")?;
        let seq: i64 = self
            .conn
            .query_row(
                "SELECT last_seq FROM activity_numbers WHERE year = ?1",
                params![year],
                |row| row.get(0),
            )
            .context("Failed to read activity number")?;
        Ok(format!("{}.{:03}", year, seq))
    }

    // ── Activities ────────────────────────────────────────────────────

    pub fn insert_activity(&self, a: &RoadworkActivity) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO activities ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
                    ACTIVITY_COLUMNS
                ),
                params![
                    a.uuid.to_string(),
                    a.name,
                    a.description,
                    a.project_no,
                    a.activity_no,
                    a.project_manager.map(|u| u.to_string()),
                    a.traffic_agent.map(|u| u.to_string()),
                    a.project_type,
                    a.section,
                    to_json(&a.involved_users)?,
                    to_json(&a.geometry)?,
                    to_json(&a.milestones)?,
                    to_json(&a.phase_entered)?,
                    a.costs,
                    a.cost_type,
                    a.cost_last_modified.as_ref().map(ts),
                    a.cost_last_modified_by.map(|u| u.to_string()),
                    a.status.as_str(),
                    a.is_private,
                    a.is_study,
                    ts(&a.created),
                    ts(&a.last_modified),
                ],
            )
            .context("Failed to insert activity")?;
        Ok(())
    }

    /// Overwrite every mutable column. The activity number and creation
    /// stamp never change.
    pub fn update_activity(&self, a: &RoadworkActivity) -> Result<()> {
        let count = self
            .conn
            .execute(
                "UPDATE activities SET
                    name = ?2, description = ?3, project_no = ?4, project_manager = ?5,
                    traffic_agent = ?6, project_type = ?7, section = ?8, involved_users = ?9,
                    geometry = ?10, milestones = ?11, phase_entered = ?12, costs = ?13,
                    cost_type = ?14, cost_last_modified = ?15, cost_last_modified_by = ?16,
                    status = ?17, is_private = ?18, is_study = ?19, last_modified = ?20
                 WHERE uuid = ?1",
                params![
                    a.uuid.to_string(),
                    a.name,
                    a.description,
                    a.project_no,
                    a.project_manager.map(|u| u.to_string()),
                    a.traffic_agent.map(|u| u.to_string()),
                    a.project_type,
                    a.section,
                    to_json(&a.involved_users)?,
                    to_json(&a.geometry)?,
                    to_json(&a.milestones)?,
                    to_json(&a.phase_entered)?,
                    a.costs,
                    a.cost_type,
                    a.cost_last_modified.as_ref().map(ts),
                    a.cost_last_modified_by.map(|u| u.to_string()),
                    a.status.as_str(),
                    a.is_private,
                    a.is_study,
                    ts(&a.last_modified),
                ],
            )
            .context("Failed to update activity")?;
        if count == 0 {
            anyhow::bail!("Activity {} vanished during update", a.uuid);
        }
        Ok(())
    }

    /// Activity row without links or history.
    pub fn get_activity(&self, uuid: Uuid) -> Result<Option<RoadworkActivity>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM activities WHERE uuid = ?1", ACTIVITY_COLUMNS),
                params![uuid.to_string()],
                ActivityRow::read,
            )
            .optional()
            .context("Failed to query activity")?;
        row.map(ActivityRow::into_activity).transpose()
    }

    /// Every activity row, most recently modified first.
    pub fn list_activities(&self) -> Result<Vec<RoadworkActivity>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM activities ORDER BY last_modified DESC, uuid",
                ACTIVITY_COLUMNS
            ))
            .context("Failed to prepare list_activities")?;
        let rows = stmt
            .query_map([], ActivityRow::read)
            .context("Failed to query activities")?;
        let mut activities = Vec::new();
        for row in rows {
            activities.push(row.context("Failed to read activity row")?.into_activity()?);
        }
        Ok(activities)
    }

    pub fn delete_activity(&self, uuid: Uuid) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM activities WHERE uuid = ?1", params![uuid.to_string()])
            .context("Failed to delete activity")?;
        Ok(count > 0)
    }

    // ── Needs ─────────────────────────────────────────────────────────

    pub fn insert_need(&self, n: &RoadworkNeed) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO needs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                    NEED_COLUMNS
                ),
                params![
                    n.uuid.to_string(),
                    n.name,
                    n.description,
                    n.orderer.to_string(),
                    n.priority.as_str(),
                    to_json(&n.geometry)?,
                    n.finish_early_to.to_string(),
                    n.finish_optimum_to.to_string(),
                    n.finish_late_to.to_string(),
                    n.is_private,
                    to_json(&n.costs)?,
                    n.has_sponge_city_measures,
                    to_json(&n.sponge_city_measures)?,
                    n.status.as_str(),
                    n.delete_reason,
                    ts(&n.created),
                    ts(&n.last_modified),
                ],
            )
            .context("Failed to insert need")?;
        Ok(())
    }

    pub fn update_need(&self, n: &RoadworkNeed) -> Result<()> {
        let count = self
            .conn
            .execute(
                "UPDATE needs SET
                    name = ?2, description = ?3, orderer = ?4, priority = ?5, geometry = ?6,
                    finish_early_to = ?7, finish_optimum_to = ?8, finish_late_to = ?9,
                    is_private = ?10, costs = ?11, has_sponge_city_measures = ?12,
                    sponge_city_measures = ?13, status = ?14, delete_reason = ?15,
                    last_modified = ?16
                 WHERE uuid = ?1",
                params![
                    n.uuid.to_string(),
                    n.name,
                    n.description,
                    n.orderer.to_string(),
                    n.priority.as_str(),
                    to_json(&n.geometry)?,
                    n.finish_early_to.to_string(),
                    n.finish_optimum_to.to_string(),
                    n.finish_late_to.to_string(),
                    n.is_private,
                    to_json(&n.costs)?,
                    n.has_sponge_city_measures,
                    to_json(&n.sponge_city_measures)?,
                    n.status.as_str(),
                    n.delete_reason,
                    ts(&n.last_modified),
                ],
            )
            .context("Failed to update need")?;
        if count == 0 {
            anyhow::bail!("Need {} vanished during update", n.uuid);
        }
        Ok(())
    }

    /// Need row without its relation.
    pub fn get_need(&self, uuid: Uuid) -> Result<Option<RoadworkNeed>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM needs WHERE uuid = ?1", NEED_COLUMNS),
                params![uuid.to_string()],
                NeedRow::read,
            )
            .optional()
            .context("Failed to query need")?;
        row.map(NeedRow::into_need).transpose()
    }

    /// Every need row, most recently modified first.
    pub fn list_needs(&self) -> Result<Vec<RoadworkNeed>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM needs ORDER BY last_modified DESC, uuid",
                NEED_COLUMNS
            ))
            .context("Failed to prepare list_needs")?;
        let rows = stmt.query_map([], NeedRow::read).context("Failed to query needs")?;
        let mut needs = Vec::new();
        for row in rows {
            needs.push(row.context("Failed to read need row")?.into_need()?);
        }
        Ok(needs)
    }

    pub fn set_need_status(&self, uuid: Uuid, status: NeedStatus, now: &DateTime<Utc>) -> Result<()> {
        self.conn
            .execute(
                "UPDATE needs SET status = ?1, last_modified = ?2 WHERE uuid = ?3",
                params![status.as_str(), ts(now), uuid.to_string()],
            )
            .context("Failed to update need status")?;
        Ok(())
    }

    pub fn set_need_delete_reason(&self, uuid: Uuid, reason: Option<&str>) -> Result<()> {
        self.conn
            .execute(
                "UPDATE needs SET delete_reason = ?1 WHERE uuid = ?2",
                params![reason, uuid.to_string()],
            )
            .context("Failed to record need delete reason")?;
        Ok(())
    }

    pub fn delete_need(&self, uuid: Uuid) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM needs WHERE uuid = ?1", params![uuid.to_string()])
            .context("Failed to delete need")?;
        Ok(count > 0)
    }

    // ── Need links ────────────────────────────────────────────────────

    pub fn insert_link(&self, link: &NeedLink) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO activity_needs (need_uuid, activity_uuid, relation_type, is_primary, created)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    link.need_uuid.to_string(),
                    link.activity_uuid.to_string(),
                    link.relation_type.as_str(),
                    link.is_primary,
                    ts(&link.created),
                ],
            )
            .context("Failed to insert need link")?;
        Ok(())
    }

    pub fn links_for_need(&self, need: Uuid) -> Result<Vec<NeedLink>> {
        self.query_links(
            "SELECT need_uuid, activity_uuid, relation_type, is_primary, created
             FROM activity_needs WHERE need_uuid = ?1 ORDER BY created, rowid",
            need,
        )
    }

    /// Links of an activity in the order they were made.
    pub fn links_for_activity(&self, activity: Uuid) -> Result<Vec<NeedLink>> {
        self.query_links(
            "SELECT need_uuid, activity_uuid, relation_type, is_primary, created
             FROM activity_needs WHERE activity_uuid = ?1 ORDER BY created, rowid",
            activity,
        )
    }

    fn query_links(&self, sql: &str, key: Uuid) -> Result<Vec<NeedLink>> {
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare link query")?;
        let rows = stmt
            .query_map(params![key.to_string()], LinkRow::read)
            .context("Failed to query need links")?;
        let mut links = Vec::new();
        for row in rows {
            links.push(row.context("Failed to read need link row")?.into_link()?);
        }
        Ok(links)
    }

    pub fn count_assigned(&self, activity: Uuid) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM activity_needs WHERE activity_uuid = ?1 AND relation_type = ?2",
                params![activity.to_string(), RelationType::AssignedNeed.as_str()],
                |row| row.get(0),
            )
            .context("Failed to count assigned needs")
    }

    pub fn delete_links_for_need(&self, need: Uuid) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM activity_needs WHERE need_uuid = ?1",
                params![need.to_string()],
            )
            .context("Failed to delete need links")
    }

    pub fn delete_links_for_activity(&self, activity: Uuid) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM activity_needs WHERE activity_uuid = ?1",
                params![activity.to_string()],
            )
            .context("Failed to delete activity links")
    }

    // ── History ───────────────────────────────────────────────────────

    pub fn insert_history(&self, activity: Uuid, item: &ActivityHistoryItem) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO activity_history (uuid, activity_uuid, changed, who, what)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    item.uuid.to_string(),
                    activity.to_string(),
                    ts(&item.changed),
                    item.who,
                    item.what,
                ],
            )
            .context("Failed to insert history entry")?;
        Ok(())
    }

    /// Newest first; entries sharing a timestamp keep reverse insertion order.
    pub fn list_history(&self, activity: Uuid) -> Result<Vec<ActivityHistoryItem>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT uuid, changed, who, what FROM activity_history
                 WHERE activity_uuid = ?1 ORDER BY changed DESC, seq DESC",
            )
            .context("Failed to prepare list_history")?;
        let rows = stmt
            .query_map(params![activity.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .context("Failed to query history")?;
        let mut items = Vec::new();
        for row in rows {
            let (uuid, changed, who, what) = row.context("Failed to read history row")?;
            items.push(ActivityHistoryItem {
                uuid: parse_uuid(&uuid)?,
                changed: parse_ts(&changed)?,
                who,
                what,
            });
        }
        Ok(items)
    }

    pub fn delete_history_for_activity(&self, activity: Uuid) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM activity_history WHERE activity_uuid = ?1",
                params![activity.to_string()],
            )
            .context("Failed to delete history")
    }

    // ── Consultations ─────────────────────────────────────────────────

    pub fn insert_consultation(&self, c: &ConsultationInput) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO consultations ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    CONSULTATION_COLUMNS
                ),
                params![
                    c.uuid.to_string(),
                    c.activity_uuid.to_string(),
                    c.need_uuid.map(|u| u.to_string()),
                    c.input_by.to_string(),
                    c.phase.as_str(),
                    c.decline,
                    c.feedback_given,
                    c.orderer_feedback,
                    c.manager_feedback,
                    c.valuation,
                    ts(&c.last_edit),
                ],
            )
            .context("Failed to insert consultation")?;
        Ok(())
    }

    pub fn update_consultation(&self, c: &ConsultationInput) -> Result<()> {
        self.conn
            .execute(
                "UPDATE consultations SET
                    need_uuid = ?2, decline = ?3, feedback_given = ?4, orderer_feedback = ?5,
                    manager_feedback = ?6, valuation = ?7, last_edit = ?8
                 WHERE uuid = ?1",
                params![
                    c.uuid.to_string(),
                    c.need_uuid.map(|u| u.to_string()),
                    c.decline,
                    c.feedback_given,
                    c.orderer_feedback,
                    c.manager_feedback,
                    c.valuation,
                    ts(&c.last_edit),
                ],
            )
            .context("Failed to update consultation")?;
        Ok(())
    }

    pub fn get_consultation(&self, uuid: Uuid) -> Result<Option<ConsultationInput>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM consultations WHERE uuid = ?1", CONSULTATION_COLUMNS),
                params![uuid.to_string()],
                ConsultationRow::read,
            )
            .optional()
            .context("Failed to query consultation")?;
        row.map(ConsultationRow::into_consultation).transpose()
    }

    /// Consultations of an activity, optionally only those of one submitter.
    pub fn list_consultations(
        &self,
        activity: Uuid,
        input_by: Option<Uuid>,
    ) -> Result<Vec<ConsultationInput>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM consultations
                 WHERE activity_uuid = ?1 AND (?2 IS NULL OR input_by = ?2)
                 ORDER BY last_edit DESC, rowid DESC",
                CONSULTATION_COLUMNS
            ))
            .context("Failed to prepare list_consultations")?;
        let rows = stmt
            .query_map(
                params![activity.to_string(), input_by.map(|u| u.to_string())],
                ConsultationRow::read,
            )
            .context("Failed to query consultations")?;
        let mut consultations = Vec::new();
        for row in rows {
            consultations.push(row.context("Failed to read consultation row")?.into_consultation()?);
        }
        Ok(consultations)
    }

    pub fn consultation_exists(
        &self,
        activity: Uuid,
        need: Uuid,
        phase: ActivityStatus,
        input_by: Uuid,
    ) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM consultations
                 WHERE activity_uuid = ?1 AND need_uuid = ?2 AND phase = ?3 AND input_by = ?4",
                params![
                    activity.to_string(),
                    need.to_string(),
                    phase.as_str(),
                    input_by.to_string()
                ],
                |row| row.get(0),
            )
            .context("Failed to check consultation")
    }

    pub fn delete_consultations_for_activity(&self, activity: Uuid) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM consultations WHERE activity_uuid = ?1",
                params![activity.to_string()],
            )
            .context("Failed to delete consultations")
    }
}

// ── Row conversion ────────────────────────────────────────────────────

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp: {}", s))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("Invalid uuid: {}", s))
}

fn parse_opt_uuid(s: Option<String>) -> Result<Option<Uuid>> {
    s.as_deref().map(parse_uuid).transpose()
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::from_str(s).with_context(|| format!("Invalid date: {}", s))
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Failed to serialize column")
}

fn from_json<T: DeserializeOwned>(s: &str, what: &str) -> Result<T> {
    serde_json::from_str(s).with_context(|| format!("Failed to parse {} JSON", what))
}

struct UserRow {
    uuid: String,
    display_name: String,
    org_unit: String,
    roles: String,
    active: bool,
}

impl UserRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            uuid: row.get(0)?,
            display_name: row.get(1)?,
            org_unit: row.get(2)?,
            roles: row.get(3)?,
            active: row.get(4)?,
        })
    }

    fn into_user(self) -> Result<User> {
        let roles: Vec<Role> = from_json(&self.roles, "user roles")?;
        Ok(User {
            uuid: parse_uuid(&self.uuid)?,
            display_name: self.display_name,
            org_unit: self.org_unit,
            roles,
            active: self.active,
        })
    }
}

struct ActivityRow {
    uuid: String,
    name: String,
    description: String,
    project_no: Option<String>,
    activity_no: Option<String>,
    project_manager: Option<String>,
    traffic_agent: Option<String>,
    project_type: Option<String>,
    section: Option<String>,
    involved_users: String,
    geometry: String,
    milestones: String,
    phase_entered: String,
    costs: Option<f64>,
    cost_type: Option<String>,
    cost_last_modified: Option<String>,
    cost_last_modified_by: Option<String>,
    status: String,
    is_private: bool,
    is_study: bool,
    created: String,
    last_modified: String,
}

impl ActivityRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            uuid: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            project_no: row.get(3)?,
            activity_no: row.get(4)?,
            project_manager: row.get(5)?,
            traffic_agent: row.get(6)?,
            project_type: row.get(7)?,
            section: row.get(8)?,
            involved_users: row.get(9)?,
            geometry: row.get(10)?,
            milestones: row.get(11)?,
            phase_entered: row.get(12)?,
            costs: row.get(13)?,
            cost_type: row.get(14)?,
            cost_last_modified: row.get(15)?,
            cost_last_modified_by: row.get(16)?,
            status: row.get(17)?,
            is_private: row.get(18)?,
            is_study: row.get(19)?,
            created: row.get(20)?,
            last_modified: row.get(21)?,
        })
    }

    fn into_activity(self) -> Result<RoadworkActivity> {
        let status = ActivityStatus::from_str(&self.status).context("Failed to parse activity status")?;
        Ok(RoadworkActivity {
            uuid: parse_uuid(&self.uuid)?,
            name: self.name,
            description: self.description,
            project_no: self.project_no,
            activity_no: self.activity_no,
            project_manager: parse_opt_uuid(self.project_manager)?,
            traffic_agent: parse_opt_uuid(self.traffic_agent)?,
            project_type: self.project_type,
            section: self.section,
            involved_users: from_json(&self.involved_users, "involved users")?,
            geometry: from_json(&self.geometry, "activity geometry")?,
            milestones: from_json(&self.milestones, "milestones")?,
            costs: self.costs,
            cost_type: self.cost_type,
            cost_last_modified: parse_opt_ts(self.cost_last_modified)?,
            cost_last_modified_by: parse_opt_uuid(self.cost_last_modified_by)?,
            status,
            is_private: self.is_private,
            is_study: self.is_study,
            phase_entered: from_json(&self.phase_entered, "phase timestamps")?,
            created: parse_ts(&self.created)?,
            last_modified: parse_ts(&self.last_modified)?,
            linked_needs: Vec::new(),
            history: Vec::new(),
        })
    }
}

struct NeedRow {
    uuid: String,
    name: String,
    description: String,
    orderer: String,
    priority: String,
    geometry: String,
    finish_early_to: String,
    finish_optimum_to: String,
    finish_late_to: String,
    is_private: bool,
    costs: String,
    has_sponge_city_measures: bool,
    sponge_city_measures: String,
    status: String,
    delete_reason: Option<String>,
    created: String,
    last_modified: String,
}

impl NeedRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            uuid: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            orderer: row.get(3)?,
            priority: row.get(4)?,
            geometry: row.get(5)?,
            finish_early_to: row.get(6)?,
            finish_optimum_to: row.get(7)?,
            finish_late_to: row.get(8)?,
            is_private: row.get(9)?,
            costs: row.get(10)?,
            has_sponge_city_measures: row.get(11)?,
            sponge_city_measures: row.get(12)?,
            status: row.get(13)?,
            delete_reason: row.get(14)?,
            created: row.get(15)?,
            last_modified: row.get(16)?,
        })
    }

    fn into_need(self) -> Result<RoadworkNeed> {
        let priority = Priority::from_str(&self.priority)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse need priority")?;
        let status = NeedStatus::from_str(&self.status).context("Failed to parse need status")?;
        Ok(RoadworkNeed {
            uuid: parse_uuid(&self.uuid)?,
            name: self.name,
            description: self.description,
            orderer: parse_uuid(&self.orderer)?,
            priority,
            geometry: from_json(&self.geometry, "need geometry")?,
            finish_early_to: parse_date(&self.finish_early_to)?,
            finish_optimum_to: parse_date(&self.finish_optimum_to)?,
            finish_late_to: parse_date(&self.finish_late_to)?,
            is_private: self.is_private,
            costs: from_json(&self.costs, "need costs")?,
            has_sponge_city_measures: self.has_sponge_city_measures,
            sponge_city_measures: from_json(&self.sponge_city_measures, "sponge-city measures")?,
            status,
            delete_reason: self.delete_reason,
            created: parse_ts(&self.created)?,
            last_modified: parse_ts(&self.last_modified)?,
            relation: None,
        })
    }
}

struct LinkRow {
    need_uuid: String,
    activity_uuid: String,
    relation_type: String,
    is_primary: bool,
    created: String,
}

impl LinkRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            need_uuid: row.get(0)?,
            activity_uuid: row.get(1)?,
            relation_type: row.get(2)?,
            is_primary: row.get(3)?,
            created: row.get(4)?,
        })
    }

    fn into_link(self) -> Result<NeedLink> {
        Ok(NeedLink {
            need_uuid: parse_uuid(&self.need_uuid)?,
            activity_uuid: parse_uuid(&self.activity_uuid)?,
            relation_type: RelationType::from_str(&self.relation_type)
                .context("Failed to parse relation type")?,
            is_primary: self.is_primary,
            created: parse_ts(&self.created)?,
        })
    }
}

struct ConsultationRow {
    uuid: String,
    activity_uuid: String,
    need_uuid: Option<String>,
    input_by: String,
    phase: String,
    decline: bool,
    feedback_given: bool,
    orderer_feedback: String,
    manager_feedback: String,
    valuation: i32,
    last_edit: String,
}

impl ConsultationRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            uuid: row.get(0)?,
            activity_uuid: row.get(1)?,
            need_uuid: row.get(2)?,
            input_by: row.get(3)?,
            phase: row.get(4)?,
            decline: row.get(5)?,
            feedback_given: row.get(6)?,
            orderer_feedback: row.get(7)?,
            manager_feedback: row.get(8)?,
            valuation: row.get(9)?,
            last_edit: row.get(10)?,
        })
    }

    fn into_consultation(self) -> Result<ConsultationInput> {
        Ok(ConsultationInput {
            uuid: parse_uuid(&self.uuid)?,
            activity_uuid: parse_uuid(&self.activity_uuid)?,
            need_uuid: parse_opt_uuid(self.need_uuid)?,
            input_by: parse_uuid(&self.input_by)?,
            phase: ActivityStatus::from_str(&self.phase).context("Failed to parse consultation phase")?,
            decline: self.decline,
            feedback_given: self.feedback_given,
            orderer_feedback: self.orderer_feedback,
            manager_feedback: self.manager_feedback,
            valuation: self.valuation,
            last_edit: parse_ts(&self.last_edit)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ValidationCode;
    use crate::roadworks::fixtures;

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = RoadworksDb::new_in_memory()?;

        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN
             ('users', 'activities', 'needs', 'activity_needs', 'activity_history', 'consultations',
              'management_areas', 'addresses', 'activity_numbers')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 9, "Expected 9 tables to exist");

        // Migrations are idempotent.
        db.run_migrations()?;
        Ok(())
    }

    #[test]
    fn test_activity_round_trip() -> Result<()> {
        let db = RoadworksDb::new_in_memory()?;
        let store = db.store();
        let mut activity = fixtures::activity_row(Uuid::new_v4());
        activity.costs = Some(1000.0);
        activity.involved_users = vec![Uuid::new_v4()];
        activity
            .phase_entered
            .insert(ActivityStatus::Review, activity.created);
        store.insert_activity(&activity)?;

        let fetched = store.get_activity(activity.uuid)?.expect("activity should exist");
        assert_eq!(fetched, activity);
        assert!(store.get_activity(Uuid::new_v4())?.is_none());
        Ok(())
    }

    #[test]
    fn test_need_round_trip_and_status_update() -> Result<()> {
        let db = RoadworksDb::new_in_memory()?;
        let store = db.store();
        let need = fixtures::need_owned_by(Uuid::new_v4());
        store.insert_need(&need)?;
        assert_eq!(store.get_need(need.uuid)?.as_ref(), Some(&need));

        store.set_need_status(need.uuid, NeedStatus::Verified1, &Utc::now())?;
        store.set_need_delete_reason(need.uuid, Some("duplicate"))?;
        let fetched = store.get_need(need.uuid)?.expect("need should exist");
        assert_eq!(fetched.status, NeedStatus::Verified1);
        assert_eq!(fetched.delete_reason.as_deref(), Some("duplicate"));
        Ok(())
    }

    #[test]
    fn test_history_is_newest_first() -> Result<()> {
        let db = RoadworksDb::new_in_memory()?;
        let store = db.store();
        let activity = fixtures::activity_row(Uuid::new_v4());
        store.insert_activity(&activity)?;

        let now = Utc::now();
        for (offset, what) in [(0, "first"), (1, "second"), (1, "third")] {
            store.insert_history(
                activity.uuid,
                &ActivityHistoryItem {
                    uuid: Uuid::new_v4(),
                    changed: now + chrono::Duration::seconds(offset),
                    who: "Tester".into(),
                    what: what.into(),
                },
            )?;
        }

        let history = store.list_history(activity.uuid)?;
        let texts: Vec<_> = history.iter().map(|h| h.what.as_str()).collect();
        assert_eq!(texts, vec!["third", "second", "first"]);
        Ok(())
    }

    #[test]
    fn test_activity_numbers_are_sequential_per_year() -> Result<()> {
        let db = RoadworksDb::new_in_memory()?;
        let store = db.store();
        assert_eq!(store.next_activity_number(2026)?, "2026.001");
        assert_eq!(store.next_activity_number(2026)?, "2026.002");
        assert_eq!(store.next_activity_number(2027)?, "2027.001");
        Ok(())
    }

    #[test]
    fn test_nearest_address() -> Result<()> {
        let db = RoadworksDb::new_in_memory()?;
        let store = db.store();
        assert!(store.nearest_address(0.0, 0.0)?.is_none());
        for (street, x, y) in [("Far Lane", 500.0, 500.0), ("Near Road", 3.0, 4.0)] {
            store.insert_address(&Address {
                street: street.into(),
                house_number: None,
                x,
                y,
            })?;
        }
        let nearest = store.nearest_address(0.0, 0.0)?.expect("address");
        assert_eq!(nearest.street, "Near Road");
        Ok(())
    }

    #[test]
    fn test_failed_unit_of_work_rolls_back() -> Result<()> {
        let db = RoadworksDb::new_in_memory()?;
        let activity = fixtures::activity_row(Uuid::new_v4());

        let result: Result<(), RoadworksError> = db.run_in_transaction(|store| {
            store.insert_activity(&activity)?;
            Err(ValidationCode::NoAssignedNeed.into())
        });
        assert!(matches!(
            result,
            Err(RoadworksError::Validation(ValidationCode::NoAssignedNeed))
        ));
        assert!(db.store().get_activity(activity.uuid)?.is_none());

        db.run_in_transaction(|store| Ok(store.insert_activity(&activity)?))?;
        assert!(db.store().get_activity(activity.uuid)?.is_some());
        Ok(())
    }

    #[test]
    fn test_links_and_assigned_count() -> Result<()> {
        let db = RoadworksDb::new_in_memory()?;
        let store = db.store();
        let activity = fixtures::activity_row(Uuid::new_v4());
        store.insert_activity(&activity)?;
        let orderer = Uuid::new_v4();
        let assigned = fixtures::need_owned_by(orderer);
        let registered = fixtures::need_owned_by(orderer);
        store.insert_need(&assigned)?;
        store.insert_need(&registered)?;

        for (need, relation) in [
            (&assigned, RelationType::AssignedNeed),
            (&registered, RelationType::RegisteredNeed),
        ] {
            store.insert_link(&NeedLink {
                need_uuid: need.uuid,
                activity_uuid: activity.uuid,
                relation_type: relation,
                is_primary: relation == RelationType::AssignedNeed,
                created: Utc::now(),
            })?;
        }

        assert_eq!(store.count_assigned(activity.uuid)?, 1);
        assert_eq!(store.links_for_activity(activity.uuid)?.len(), 2);
        assert_eq!(store.links_for_need(registered.uuid)?.len(), 1);
        assert_eq!(store.delete_links_for_need(assigned.uuid)?, 1);
        assert_eq!(store.count_assigned(activity.uuid)?, 0);
        Ok(())
    }

    #[test]
    fn test_consultations_filter_by_submitter() -> Result<()> {
        let db = RoadworksDb::new_in_memory()?;
        let store = db.store();
        let activity = fixtures::activity_row(Uuid::new_v4());
        store.insert_activity(&activity)?;
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        for input_by in [alice, bob, alice] {
            store.insert_consultation(&ConsultationInput {
                uuid: Uuid::new_v4(),
                activity_uuid: activity.uuid,
                need_uuid: None,
                input_by,
                phase: ActivityStatus::Inconsult1,
                decline: false,
                feedback_given: false,
                orderer_feedback: String::new(),
                manager_feedback: String::new(),
                valuation: 0,
                last_edit: Utc::now(),
            })?;
        }
        assert_eq!(store.list_consultations(activity.uuid, None)?.len(), 3);
        assert_eq!(store.list_consultations(activity.uuid, Some(alice))?.len(), 2);
        assert_eq!(store.list_consultations(activity.uuid, Some(Uuid::new_v4()))?.len(), 0);
        Ok(())
    }

    #[test]
    fn test_user_upsert_replaces_roles() -> Result<()> {
        let db = RoadworksDb::new_in_memory()?;
        let store = db.store();
        let mut user = fixtures::user("Dana", &[Role::Orderer]);
        store.upsert_user(&user)?;
        user.roles = vec![Role::TerritoryManager];
        user.display_name = "Dana M.".into();
        store.upsert_user(&user)?;

        let fetched = store.get_user(user.uuid)?.expect("user");
        assert_eq!(fetched.roles, vec![Role::TerritoryManager]);
        assert_eq!(store.display_name(user.uuid)?, "Dana M.");
        let stranger = Uuid::new_v4();
        assert_eq!(store.display_name(stranger)?, stranger.to_string());
        assert_eq!(store.list_users()?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_db_handle_runs_on_blocking_pool() -> Result<()> {
        let handle = DbHandle::new(RoadworksDb::new_in_memory()?);
        let number = handle
            .call(|db| Ok(db.store().next_activity_number(2030)?))
            .await?;
        assert_eq!(number, "2030.001");
        assert!(handle.lock_sync().is_ok());
        Ok(())
    }
}
