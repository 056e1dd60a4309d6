//! The durable, `rusqlite`-backed "IndexedDB-like" store (§6). Table layout
//! follows §6 literally: `records` keyed `(type, id)`, `inverseRelationships`
//! keyed `(type, id)` holding the owner's edges, and `transformLog` as an
//! ordered append log. Schema version lives in a `meta` table the way the
//! teacher's sync engines keep a `sync_kv`/`schema_version` row.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::{AsyncKvStore, InverseEdgeRow, StoreChange};
use crate::error::Result;
use crate::schema::Schema;
use crate::types::{Identity, Record, Transform};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open(path)?),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn create_object_stores(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS records (
    type TEXT NOT NULL,
    id TEXT NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (type, id)
);

CREATE TABLE IF NOT EXISTS inverse_relationships (
    owner_type TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    relationship TEXT NOT NULL,
    related_type TEXT NOT NULL,
    related_id TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_inverse_relationships_owner
    ON inverse_relationships (owner_type, owner_id);

CREATE TABLE IF NOT EXISTS transform_log (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    transform_id TEXT NOT NULL,
    data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS meta (
    k TEXT PRIMARY KEY,
    v TEXT NOT NULL
);
"#,
        )?;
        Ok(())
    }
}

#[async_trait]
impl AsyncKvStore for SqliteStore {
    async fn open(&self, schema: &Schema) -> Result<()> {
        let conn = self.conn.lock();
        Self::create_object_stores(&conn)?;

        let hash = schema.schema_hash().to_string();
        let current: Option<String> = conn
            .query_row("SELECT v FROM meta WHERE k = 'schema_version'", [], |r| r.get(0))
            .optional()?;

        if current.as_deref() != Some(hash.as_str()) {
            conn.execute_batch(
                "DELETE FROM records; DELETE FROM inverse_relationships; DELETE FROM transform_log;",
            )?;
            conn.execute(
                "INSERT INTO meta (k, v) VALUES ('schema_version', ?1)
                 ON CONFLICT(k) DO UPDATE SET v = excluded.v",
                params![hash],
            )?;
        }
        Ok(())
    }

    async fn get_record(&self, identity: &Identity) -> Result<Option<Record>> {
        let conn = self.conn.lock();
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM records WHERE type = ?1 AND id = ?2",
                params![identity.type_, identity.id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(data.map(|d| serde_json::from_str(&d)).transpose()?)
    }

    async fn records_of_type(&self, type_: &str) -> Result<Vec<Record>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT data FROM records WHERE type = ?1")?;
        let rows = stmt.query_map(params![type_], |r| r.get::<_, String>(0))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(serde_json::from_str(&row?)?);
        }
        Ok(records)
    }

    async fn inverse_edges(&self, owner: &Identity) -> Result<Vec<InverseEdgeRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT relationship, related_type, related_id FROM inverse_relationships
             WHERE owner_type = ?1 AND owner_id = ?2",
        )?;
        let rows = stmt.query_map(params![owner.type_, owner.id], |r| {
            Ok(InverseEdgeRow {
                owner: owner.clone(),
                relationship: r.get(0)?,
                related_record: Identity::new(r.get::<_, String>(1)?, r.get::<_, String>(2)?),
            })
        })?;
        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?);
        }
        Ok(edges)
    }

    async fn transform_log(&self) -> Result<Vec<Transform>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT data FROM transform_log ORDER BY seq ASC")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut transforms = Vec::new();
        for row in rows {
            transforms.push(serde_json::from_str(&row?)?);
        }
        Ok(transforms)
    }

    async fn commit(&self, change: StoreChange) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        for record in &change.upserts {
            let data = serde_json::to_string(record)?;
            tx.execute(
                "INSERT INTO records (type, id, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT(type, id) DO UPDATE SET data = excluded.data",
                params![record.type_, record.id, data],
            )?;
        }
        for identity in &change.deletes {
            tx.execute(
                "DELETE FROM records WHERE type = ?1 AND id = ?2",
                params![identity.type_, identity.id],
            )?;
        }
        for (owner, edges) in &change.inverse_edges {
            tx.execute(
                "DELETE FROM inverse_relationships WHERE owner_type = ?1 AND owner_id = ?2",
                params![owner.type_, owner.id],
            )?;
            for edge in edges {
                tx.execute(
                    "INSERT INTO inverse_relationships
                     (owner_type, owner_id, relationship, related_type, related_id)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        owner.type_,
                        owner.id,
                        edge.relationship,
                        edge.related_record.type_,
                        edge.related_record.id
                    ],
                )?;
            }
        }

        let transform_data = serde_json::to_string(&change.transform)?;
        tx.execute(
            "INSERT INTO transform_log (transform_id, data) VALUES (?1, ?2)",
            params![change.transform.id, transform_data],
        )?;

        tx.commit()?;
        Ok(())
    }
}
