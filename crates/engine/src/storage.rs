//! SQLite-backed map and inventory store. Maps are kept as whole JSON
//! snapshots keyed by id; the editor never sees SQL.

use crate::catalog::Catalog;
use anyhow::Context;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use terraplan_protocol::{MapState, ModularPiece, TerrainType};
use time::format_description::well_known::Rfc3339;

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(i64::MAX)
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

fn new_id(prefix: &str) -> String {
    let c = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{c}", now_ms())
}

fn content_hash(payload: &str) -> String {
    format!("{:x}", Sha256::digest(payload.as_bytes()))
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapSummary {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub updated_at_ms: i64,
    pub rev: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOutcome {
    pub rev: i64,
    /// False when the snapshot matched what was already stored.
    pub changed: bool,
}

impl SqliteStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn open(&self) -> anyhow::Result<Connection> {
        let path = self.db_path.clone();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create db dir: {}", dir.display()))?;
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("open sqlite db: {}", path.display()))?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        migrate(&conn)?;
        Ok(conn)
    }

    pub fn list_maps(&self) -> anyhow::Result<Vec<MapSummary>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, created_at, updated_at_ms, rev FROM maps ORDER BY updated_at_ms DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(MapSummary {
                id: row.get(0)?,
                name: row.get(1)?,
                created_at: row.get(2)?,
                updated_at_ms: row.get(3)?,
                rev: row.get(4)?,
            })
        })?;
        Ok(rows.filter_map(Result::ok).collect())
    }

    pub fn load_map(&self, id: &str) -> anyhow::Result<Option<MapState>> {
        let conn = self.open()?;
        let payload: Option<String> = conn
            .query_row("SELECT payload_json FROM maps WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        payload
            .map(|p| serde_json::from_str(&p).with_context(|| format!("decode map {id}")))
            .transpose()
    }

    /// Store a new map and return its id.
    pub fn create_map(&self, map: &MapState) -> anyhow::Result<String> {
        let id = new_id("map");
        self.save_map(&id, map)?;
        Ok(id)
    }

    /// Insert or replace the snapshot under `id`. Identical content keeps the current rev.
    pub fn save_map(&self, id: &str, map: &MapState) -> anyhow::Result<SaveOutcome> {
        let payload_json = serde_json::to_string(map).context("encode map")?;
        let hash = content_hash(&payload_json);
        let mut conn = self.open()?;
        let tx = conn.transaction()?;

        let existing: Option<(String, i64)> = tx
            .query_row(
                "SELECT content_hash, rev FROM maps WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let ts = now_ms();
        let outcome = match existing {
            Some((old_hash, rev)) if old_hash == hash => SaveOutcome { rev, changed: false },
            Some((_, rev)) => {
                tx.execute(
                    "UPDATE maps SET name = ?2, payload_json = ?3, content_hash = ?4, updated_at_ms = ?5, rev = ?6
                     WHERE id = ?1",
                    (id, &map.name, &payload_json, &hash, ts, rev + 1),
                )?;
                let payload = serde_json::json!({ "id": id, "rev": rev + 1 });
                append_event_tx(&tx, "map.saved", Some(id), payload)?;
                SaveOutcome {
                    rev: rev + 1,
                    changed: true,
                }
            }
            None => {
                tx.execute(
                    "INSERT INTO maps (id, name, payload_json, content_hash, created_at, updated_at_ms, rev)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
                    (id, &map.name, &payload_json, &hash, now_rfc3339(), ts),
                )?;
                let payload = serde_json::json!({ "id": id, "name": map.name });
                append_event_tx(&tx, "map.created", Some(id), payload)?;
                SaveOutcome { rev: 1, changed: true }
            }
        };
        tx.commit()?;
        if outcome.changed {
            log::info!("saved map {id} rev {}", outcome.rev);
        }
        Ok(outcome)
    }

    pub fn delete_map(&self, id: &str) -> anyhow::Result<bool> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let n = tx.execute("DELETE FROM maps WHERE id = ?1", [id])?;
        if n > 0 {
            append_event_tx(&tx, "map.deleted", Some(id), serde_json::json!({ "id": id }))?;
        }
        tx.commit()?;
        Ok(n > 0)
    }

    pub fn list_terrain_types(&self) -> anyhow::Result<Vec<TerrainType>> {
        self.list_json("SELECT payload_json FROM terrain_types ORDER BY id")
    }

    pub fn upsert_terrain_type(&self, t: &TerrainType) -> anyhow::Result<()> {
        self.upsert_json("terrain_types", &t.id, t)
    }

    pub fn delete_terrain_type(&self, id: &str) -> anyhow::Result<bool> {
        let conn = self.open()?;
        Ok(conn.execute("DELETE FROM terrain_types WHERE id = ?1", [id])? > 0)
    }

    pub fn list_pieces(&self) -> anyhow::Result<Vec<ModularPiece>> {
        self.list_json("SELECT payload_json FROM pieces ORDER BY id")
    }

    pub fn upsert_piece(&self, p: &ModularPiece) -> anyhow::Result<()> {
        self.upsert_json("pieces", &p.id, p)
    }

    pub fn delete_piece(&self, id: &str) -> anyhow::Result<bool> {
        let conn = self.open()?;
        Ok(conn.execute("DELETE FROM pieces WHERE id = ?1", [id])? > 0)
    }

    pub fn load_catalog(&self) -> anyhow::Result<Catalog> {
        Ok(Catalog::new(self.list_pieces()?, self.list_terrain_types()?))
    }

    pub fn get_rev(&self) -> anyhow::Result<i64> {
        let conn = self.open()?;
        let rev: Option<i64> =
            conn.query_row("SELECT MAX(seq) FROM event_log", [], |row| row.get(0))?;
        Ok(rev.unwrap_or(0))
    }

    fn list_json<T: serde::de::DeserializeOwned>(&self, sql: &str) -> anyhow::Result<Vec<T>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for payload in rows {
            let payload = payload?;
            match serde_json::from_str(&payload) {
                Ok(v) => out.push(v),
                Err(e) => log::warn!("skipping undecodable inventory row: {e}"),
            }
        }
        Ok(out)
    }

    fn upsert_json<T: Serialize>(&self, table: &str, id: &str, value: &T) -> anyhow::Result<()> {
        let payload_json = serde_json::to_string(value)?;
        let conn = self.open()?;
        conn.execute(
            &format!(
                "INSERT INTO {table} (id, payload_json, updated_at_ms) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET payload_json = excluded.payload_json, updated_at_ms = excluded.updated_at_ms"
            ),
            (id, &payload_json, now_ms()),
        )
        .with_context(|| format!("upsert {table}.{id}"))?;
        Ok(())
    }
}

fn migrate(conn: &Connection) -> anyhow::Result<()> {
    let v: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if v < 1 {
        conn.execute_batch(
            r#"
-- Monotonic revision source for UI sync.
CREATE TABLE IF NOT EXISTS event_log (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  ts_ms INTEGER NOT NULL,
  kind TEXT NOT NULL,
  entity_id TEXT,
  payload_json TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_event_log_ts ON event_log(ts_ms);
CREATE INDEX IF NOT EXISTS idx_event_log_kind ON event_log(kind);

CREATE TABLE IF NOT EXISTS maps (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  payload_json TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at_ms INTEGER NOT NULL,
  rev INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_maps_updated_at ON maps(updated_at_ms);

CREATE TABLE IF NOT EXISTS terrain_types (
  id TEXT PRIMARY KEY,
  payload_json TEXT NOT NULL,
  updated_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS pieces (
  id TEXT PRIMARY KEY,
  payload_json TEXT NOT NULL,
  updated_at_ms INTEGER NOT NULL
);
"#,
        )?;

        conn.pragma_update(None, "user_version", 1_i64)?;
    }

    ensure_column(conn, "maps", "content_hash", "TEXT NOT NULL DEFAULT ''")?;

    Ok(())
}

fn ensure_column(conn: &Connection, table: &str, col: &str, decl: &str) -> anyhow::Result<()> {
    let sql = format!("ALTER TABLE {table} ADD COLUMN {col} {decl}");
    match conn.execute(&sql, []) {
        Ok(_) => Ok(()),
        Err(e) => {
            // Ignore "duplicate column name".
            if e.to_string().to_lowercase().contains("duplicate column") {
                return Ok(());
            }
            Err(e).with_context(|| format!("ensure column {table}.{col}"))
        }
    }
}

fn append_event_tx(
    tx: &rusqlite::Transaction<'_>,
    kind: &str,
    entity_id: Option<&str>,
    payload: serde_json::Value,
) -> anyhow::Result<i64> {
    let ts = now_ms();
    let payload_json = payload.to_string();
    tx.execute(
        "INSERT INTO event_log (ts_ms, kind, entity_id, payload_json) VALUES (?1, ?2, ?3, ?4)",
        (ts, kind, entity_id, payload_json),
    )?;
    Ok(tx.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use terraplan_protocol::{PlacedPiece, Rotation, Size};

    fn temp_store() -> SqliteStore {
        let p = std::env::temp_dir().join(format!(
            "terraplan-engine-test-{}.db",
            new_id("db")
        ));
        let store = SqliteStore::new(p);
        let _ = store.open().expect("open db");
        store
    }

    fn sample_map() -> MapState {
        let mut m = MapState {
            name: "Ruined keep".into(),
            ..MapState::default()
        };
        m.levels.insert(1);
        m.placed_pieces.push(PlacedPiece {
            id: "pp-1".into(),
            piece_id: "wall".into(),
            x: 2.0,
            y: 0.5,
            rotation: Rotation::Deg270,
            level: 1,
        });
        m
    }

    #[test]
    fn saved_map_loads_back_identically() {
        let store = temp_store();
        let map = sample_map();
        let id = store.create_map(&map).unwrap();
        assert_eq!(store.load_map(&id).unwrap(), Some(map));
        assert_eq!(store.load_map("missing").unwrap(), None);

        let listed = store.list_maps().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Ruined keep");
        assert_eq!(listed[0].rev, 1);
    }

    #[test]
    fn unchanged_save_keeps_rev() {
        let store = temp_store();
        let mut map = sample_map();
        let id = store.create_map(&map).unwrap();
        let rev_before = store.get_rev().unwrap();

        let same = store.save_map(&id, &map).unwrap();
        assert_eq!(same, SaveOutcome { rev: 1, changed: false });
        assert_eq!(store.get_rev().unwrap(), rev_before);

        map.placed_pieces.clear();
        let bumped = store.save_map(&id, &map).unwrap();
        assert_eq!(bumped, SaveOutcome { rev: 2, changed: true });
        assert!(store.get_rev().unwrap() > rev_before);
    }

    #[test]
    fn delete_map_reports_presence() {
        let store = temp_store();
        let id = store.create_map(&MapState::default()).unwrap();
        assert!(store.delete_map(&id).unwrap());
        assert!(!store.delete_map(&id).unwrap());
        assert!(store.list_maps().unwrap().is_empty());
    }

    #[test]
    fn inventory_upserts_feed_the_catalog() {
        let store = temp_store();
        store
            .upsert_terrain_type(&TerrainType {
                id: "water".into(),
                name: "Water".into(),
                color: "#3a7bd5".into(),
                description: None,
            })
            .unwrap();
        let mut piece = ModularPiece {
            id: "river-2x6".into(),
            name: "River".into(),
            terrain_type_id: "water".into(),
            size: Size { width: 2.0, height: 6.0 },
            is_diagonal: false,
            default_rotation: Rotation::Deg0,
            cell_colors: None,
            quantity: Some(3),
        };
        store.upsert_piece(&piece).unwrap();
        piece.quantity = Some(4);
        store.upsert_piece(&piece).unwrap();

        let catalog = store.load_catalog().unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.piece("river-2x6").unwrap().quantity, Some(4));
        let names: Vec<&str> = catalog.terrain_types().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Water"]);

        assert!(store.delete_piece("river-2x6").unwrap());
        assert!(store.list_pieces().unwrap().is_empty());
        assert!(store.delete_terrain_type("water").unwrap());
    }
}
