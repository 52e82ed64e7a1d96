//! SQLite 库存存储
//!
//! rusqlite 连接是同步的：包在 Arc<Mutex<Connection>> 中，每次操作经 spawn_blocking 执行，
//! 外层加超时；update 在单个事务内完成「读-改-写」，保证单个动作要么完整生效要么不生效。

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::timeout;

use crate::core::InventoryError;
use crate::inventory::{Freshness, InventoryStore, Item, ItemFields, ItemId, ItemPatch};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS fridge_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    category TEXT,
    subcategory TEXT,
    brand TEXT,
    confidence REAL,
    image_url TEXT NOT NULL,
    position TEXT,
    item_amount_desc TEXT,
    freshness TEXT NOT NULL DEFAULT 'good',
    expiry_estimate TEXT,
    additional_info TEXT,
    detected_at TEXT,
    device_id TEXT,
    put_in_time TEXT
);
CREATE INDEX IF NOT EXISTS idx_fridge_items_device ON fridge_items(device_id);
";

const SELECT_COLUMNS: &str = "SELECT id, name, category, subcategory, brand, confidence, image_url, \
     position, item_amount_desc, freshness, expiry_estimate, additional_info, detected_at, \
     device_id, put_in_time FROM fridge_items";

/// 基于单个 SQLite 连接的库存存储
#[derive(Clone)]
pub struct SqliteInventoryStore {
    conn: Arc<Mutex<Connection>>,
    op_timeout: Duration,
}

impl SqliteInventoryStore {
    /// 打开（或创建）数据库文件并建表
    pub fn open(path: impl AsRef<Path>, op_timeout: Duration) -> Result<Self, InventoryError> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(op_timeout)?;
        Self::from_connection(conn, op_timeout)
    }

    /// 内存数据库（测试与离线演示）
    pub fn open_in_memory() -> Result<Self, InventoryError> {
        Self::from_connection(Connection::open_in_memory()?, Duration::from_secs(5))
    }

    fn from_connection(conn: Connection, op_timeout: Duration) -> Result<Self, InventoryError> {
        conn.execute_batch(SCHEMA)?;
        tracing::debug!("fridge_items schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            op_timeout,
        })
    }

    /// 在阻塞线程池中执行一次数据库操作，并施加超时
    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, InventoryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, InventoryError> + Send + 'static,
    {
        let conn = self.conn.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| InventoryError::Unavailable("connection mutex poisoned".to_string()))?;
            f(&mut guard)
        });
        match timeout(self.op_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(InventoryError::Unavailable(join_err.to_string())),
            Err(_) => Err(InventoryError::Timeout(op)),
        }
    }
}

#[async_trait]
impl InventoryStore for SqliteInventoryStore {
    async fn list(&self, device_id: Option<&str>) -> Result<Vec<Item>, InventoryError> {
        let device_id = device_id.map(String::from);
        self.run("list", move |conn| {
            let rows = match device_id {
                Some(device) => {
                    let mut stmt =
                        conn.prepare(&format!("{SELECT_COLUMNS} WHERE device_id = ?1 ORDER BY id"))?;
                    let rows = stmt
                        .query_map(params![device], StoredRow::read)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                }
                None => {
                    let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id"))?;
                    let rows = stmt
                        .query_map([], StoredRow::read)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                }
            };
            rows.into_iter().map(StoredRow::into_item).collect()
        })
        .await
    }

    async fn get(&self, id: ItemId) -> Result<Option<Item>, InventoryError> {
        self.run("get", move |conn| {
            select_one(conn, id)?.map(StoredRow::into_item).transpose()
        })
        .await
    }

    async fn insert(&self, fields: ItemFields) -> Result<Item, InventoryError> {
        fields.validate().map_err(InventoryError::InvalidItem)?;
        self.run("insert", move |conn| {
            conn.execute(
                "INSERT INTO fridge_items (name, category, subcategory, brand, confidence, image_url, \
                 position, item_amount_desc, freshness, expiry_estimate, additional_info, detected_at, \
                 device_id, put_in_time) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    fields.name,
                    fields.category,
                    fields.subcategory,
                    fields.brand,
                    fields.confidence,
                    fields.image_url,
                    to_json_column(&fields.position)?,
                    fields.item_amount_desc,
                    fields.freshness.as_str(),
                    fields.expiry_estimate,
                    to_json_column(&fields.additional_info)?,
                    fields.detected_at.map(|t| t.to_rfc3339()),
                    fields.device_id,
                    fields.put_in_time.map(|t| t.to_rfc3339()),
                ],
            )?;
            let id = conn.last_insert_rowid();
            Ok(Item { id, fields })
        })
        .await
    }

    async fn update(&self, id: ItemId, patch: ItemPatch) -> Result<Option<Item>, InventoryError> {
        patch.validate().map_err(InventoryError::InvalidItem)?;
        self.run("update", move |conn| {
            let tx = conn.transaction()?;
            let Some(row) = select_one(&tx, id)? else {
                return Ok(None);
            };
            let mut item = row.into_item()?;
            item.fields.apply(patch);
            item.fields.validate().map_err(InventoryError::InvalidItem)?;
            let f = &item.fields;
            tx.execute(
                "UPDATE fridge_items SET name = ?2, category = ?3, subcategory = ?4, brand = ?5, \
                 confidence = ?6, image_url = ?7, position = ?8, item_amount_desc = ?9, freshness = ?10, \
                 expiry_estimate = ?11, additional_info = ?12, detected_at = ?13, device_id = ?14, \
                 put_in_time = ?15 WHERE id = ?1",
                params![
                    id,
                    f.name,
                    f.category,
                    f.subcategory,
                    f.brand,
                    f.confidence,
                    f.image_url,
                    to_json_column(&f.position)?,
                    f.item_amount_desc,
                    f.freshness.as_str(),
                    f.expiry_estimate,
                    to_json_column(&f.additional_info)?,
                    f.detected_at.map(|t| t.to_rfc3339()),
                    f.device_id,
                    f.put_in_time.map(|t| t.to_rfc3339()),
                ],
            )?;
            tx.commit()?;
            Ok(Some(item))
        })
        .await
    }

    async fn delete(&self, id: ItemId) -> Result<bool, InventoryError> {
        self.run("delete", move |conn| {
            let n = conn.execute("DELETE FROM fridge_items WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
        .await
    }
}

fn select_one(conn: &Connection, id: ItemId) -> Result<Option<StoredRow>, InventoryError> {
    let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
    Ok(stmt.query_row(params![id], StoredRow::read).optional()?)
}

fn to_json_column<T: Serialize>(value: &Option<T>) -> Result<Option<String>, InventoryError> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(InventoryError::from)
}

fn from_json_column<T: DeserializeOwned>(value: Option<String>) -> Result<Option<T>, InventoryError> {
    value
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(InventoryError::from)
}

fn parse_timestamp(
    value: Option<String>,
    column: &str,
) -> Result<Option<DateTime<FixedOffset>>, InventoryError> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map_err(|e| InventoryError::InvalidItem(format!("invalid {column} '{s}': {e}")))
        })
        .transpose()
}

/// 数据库原始行，JSON / 时间列仍为文本
struct StoredRow {
    id: ItemId,
    name: String,
    category: Option<String>,
    subcategory: Option<String>,
    brand: Option<String>,
    confidence: Option<f64>,
    image_url: String,
    position: Option<String>,
    item_amount_desc: Option<String>,
    freshness: String,
    expiry_estimate: Option<String>,
    additional_info: Option<String>,
    detected_at: Option<String>,
    device_id: Option<String>,
    put_in_time: Option<String>,
}

impl StoredRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            category: row.get("category")?,
            subcategory: row.get("subcategory")?,
            brand: row.get("brand")?,
            confidence: row.get("confidence")?,
            image_url: row.get("image_url")?,
            position: row.get("position")?,
            item_amount_desc: row.get("item_amount_desc")?,
            freshness: row.get("freshness")?,
            expiry_estimate: row.get("expiry_estimate")?,
            additional_info: row.get("additional_info")?,
            detected_at: row.get("detected_at")?,
            device_id: row.get("device_id")?,
            put_in_time: row.get("put_in_time")?,
        })
    }

    fn into_item(self) -> Result<Item, InventoryError> {
        let freshness: Freshness = self.freshness.parse().map_err(InventoryError::InvalidItem)?;
        Ok(Item {
            id: self.id,
            fields: ItemFields {
                name: self.name,
                category: self.category,
                subcategory: self.subcategory,
                brand: self.brand,
                confidence: self.confidence,
                image_url: self.image_url,
                position: from_json_column(self.position)?,
                item_amount_desc: self.item_amount_desc,
                freshness,
                expiry_estimate: self.expiry_estimate,
                additional_info: from_json_column(self.additional_info)?,
                detected_at: parse_timestamp(self.detected_at, "detected_at")?,
                device_id: self.device_id,
                put_in_time: parse_timestamp(self.put_in_time, "put_in_time")?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Position;
    use serde_json::json;

    fn milk() -> ItemFields {
        let mut f = ItemFields::new("milk", "img://milk").with_category("dairy");
        f.position = Some(Position {
            x: 120.0,
            y: 80.0,
            width: 60.0,
            height: 120.0,
        });
        f.additional_info = json!({"color": "white"}).as_object().cloned();
        f.detected_at = Some(DateTime::parse_from_rfc3339("2025-09-20T18:00:00+08:00").unwrap());
        f
    }

    #[tokio::test]
    async fn test_insert_get_roundtrip_keeps_structured_fields() {
        let store = SqliteInventoryStore::open_in_memory().unwrap();
        let item = store.insert(milk()).await.unwrap();
        let loaded = store.get(item.id).await.unwrap().unwrap();
        assert_eq!(loaded, item);
        assert_eq!(loaded.fields.position.as_ref().unwrap().width, 60.0);
        assert_eq!(
            loaded.fields.detected_at.unwrap().offset().local_minus_utc(),
            8 * 3600
        );
    }

    #[tokio::test]
    async fn test_ids_are_not_reused_after_delete() {
        let store = SqliteInventoryStore::open_in_memory().unwrap();
        let a = store.insert(milk()).await.unwrap();
        assert!(store.delete(a.id).await.unwrap());
        assert!(!store.delete(a.id).await.unwrap());
        let b = store.insert(milk()).await.unwrap();
        assert!(b.id > a.id);
        assert!(store.get(a.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_is_partial_and_unknown_id_is_none() {
        let store = SqliteInventoryStore::open_in_memory().unwrap();
        let item = store.insert(milk()).await.unwrap();
        let patch = ItemPatch {
            freshness: Some(Freshness::Poor),
            ..Default::default()
        };
        let updated = store.update(item.id, patch.clone()).await.unwrap().unwrap();
        assert_eq!(updated.fields.freshness, Freshness::Poor);
        assert_eq!(updated.fields.category.as_deref(), Some("dairy"));
        assert!(updated.fields.position.is_some());
        assert!(store.update(item.id + 100, patch).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_by_device() {
        let store = SqliteInventoryStore::open_in_memory().unwrap();
        store.insert(milk().with_device("fridge-1")).await.unwrap();
        store.insert(milk().with_device("fridge-2")).await.unwrap();
        store.insert(milk()).await.unwrap();
        assert_eq!(store.list(None).await.unwrap().len(), 3);
        let scoped = store.list(Some("fridge-1")).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].fields.device_id.as_deref(), Some("fridge-1"));
    }

    #[tokio::test]
    async fn test_insert_rejects_invalid_item() {
        let store = SqliteInventoryStore::open_in_memory().unwrap();
        let err = store.insert(ItemFields::new("", "img://x")).await.unwrap_err();
        assert!(matches!(err, InventoryError::InvalidItem(_)));
    }

    #[tokio::test]
    async fn test_file_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fridge.db");
        let id = {
            let store = SqliteInventoryStore::open(&path, Duration::from_secs(5)).unwrap();
            store.insert(milk()).await.unwrap().id
        };
        let store = SqliteInventoryStore::open(&path, Duration::from_secs(5)).unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().fields.name, "milk");
    }
}
