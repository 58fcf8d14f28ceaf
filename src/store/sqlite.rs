//! SQLite-backed document store
//!
//! Tasks, menus and audit entries are kept as JSON documents. Every mutation
//! runs in its own immediate transaction, which is what makes a product
//! status overwrite atomic with the read of the value it replaces.

use super::{product_key, AuditStore, MenuStore, TaskStore};
use crate::domain::{Menu, ParsingTask, ProductStatus, ProductStatusAudit, TaskStatus};
use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

impl From<rusqlite::Error> for PipelineError {
    fn from(value: rusqlite::Error) -> Self {
        PipelineError::store(format!("sqlite: {value}"))
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) the database file at `path`
    pub fn open(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                PipelineError::store(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> PipelineResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> PipelineResult<Self> {
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> PipelineResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> PipelineResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| PipelineError::store("sqlite connection lock poisoned"))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| PipelineError::store(format!("sqlite worker failed: {e}")))?
    }
}

fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    // Reports the resulting mode; in-memory databases stay "memory"
    let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

    conn.execute_batch(
        r#"
        PRAGMA synchronous=NORMAL;

        CREATE TABLE IF NOT EXISTS parsing_tasks (
          task_id TEXT PRIMARY KEY,
          document TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS menus (
          seq INTEGER PRIMARY KEY AUTOINCREMENT,
          menu_id TEXT NOT NULL UNIQUE,
          restaurant_id TEXT NOT NULL,
          document TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS menus_by_restaurant ON menus(restaurant_id, seq);

        CREATE TABLE IF NOT EXISTS product_status_audit (
          seq INTEGER PRIMARY KEY AUTOINCREMENT,
          product_id TEXT NOT NULL,
          document TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS audit_by_product ON product_status_audit(product_id, seq);
        "#,
    )
}

fn decode<T: DeserializeOwned>(kind: &str, id: &str, document: &str) -> PipelineResult<T> {
    serde_json::from_str(document)
        .map_err(|e| PipelineError::store(format!("corrupt {kind} document {id}: {e}")))
}

fn encode<T: serde::Serialize>(value: &T) -> PipelineResult<String> {
    serde_json::to_string(value)
        .map_err(|e| PipelineError::store(format!("cannot encode document: {e}")))
}

fn load_task(tx: &Transaction<'_>, task_id: &str) -> PipelineResult<ParsingTask> {
    let document: Option<String> = tx
        .query_row(
            "SELECT document FROM parsing_tasks WHERE task_id = ?1",
            params![task_id],
            |row| row.get(0),
        )
        .optional()?;
    let document = document.ok_or_else(|| PipelineError::not_found("task", task_id))?;
    decode("task", task_id, &document)
}

fn store_task(tx: &Transaction<'_>, task: &ParsingTask) -> PipelineResult<()> {
    tx.execute(
        "UPDATE parsing_tasks SET document = ?1 WHERE task_id = ?2",
        params![encode(task)?, task.task_id],
    )?;
    Ok(())
}

/// Newest menu of `restaurant_id` containing `product_id`, with its row seq
fn find_product_menu(
    conn: &Connection,
    restaurant_id: &str,
    product_id: &str,
) -> PipelineResult<(i64, Menu)> {
    let mut stmt = conn.prepare(
        "SELECT seq, menu_id, document FROM menus WHERE restaurant_id = ?1 ORDER BY seq DESC",
    )?;
    let rows = stmt.query_map(params![restaurant_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    for row in rows {
        let (seq, menu_id, document) = row?;
        let menu: Menu = decode("menu", &menu_id, &document)?;
        if menu.product(product_id).is_some() {
            return Ok((seq, menu));
        }
    }

    Err(PipelineError::not_found(
        "product",
        product_key(restaurant_id, product_id),
    ))
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn create_task(&self, task: &ParsingTask) -> PipelineResult<()> {
        let task = task.clone();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO parsing_tasks(task_id, document) VALUES (?1, ?2)",
                params![task.task_id, encode(&task)?],
            )?;
            if inserted == 0 {
                return Err(PipelineError::validation(format!(
                    "task {} already exists",
                    task.task_id
                )));
            }
            Ok(())
        })
        .await
    }

    async fn get_task(&self, task_id: &str) -> PipelineResult<ParsingTask> {
        let task_id = task_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            load_task(&tx, &task_id)
        })
        .await
    }

    async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        menu_id: Option<&str>,
        error: Option<&str>,
    ) -> PipelineResult<()> {
        let task_id = task_id.to_string();
        let menu_id = menu_id.map(str::to_string);
        let error = error.map(str::to_string);
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut task = load_task(&tx, &task_id)?;
            task.apply_status(status, menu_id.as_deref(), error.as_deref())?;
            store_task(&tx, &task)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn increment_retry_count(&self, task_id: &str) -> PipelineResult<()> {
        let task_id = task_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut task = load_task(&tx, &task_id)?;
            task.increment_retry();
            store_task(&tx, &task)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl MenuStore for SqliteStore {
    async fn create_menu(&self, mut menu: Menu) -> PipelineResult<Menu> {
        let menu_id = Uuid::new_v4().simple().to_string();
        menu.id = Some(menu_id.clone());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO menus(menu_id, restaurant_id, document) VALUES (?1, ?2, ?3)",
                params![menu_id, menu.restaurant_id, encode(&menu)?],
            )?;
            Ok(menu)
        })
        .await
    }

    async fn get_menu(&self, menu_id: &str) -> PipelineResult<Menu> {
        let menu_id = menu_id.to_string();
        self.with_conn(move |conn| {
            let document: Option<String> = conn
                .query_row(
                    "SELECT document FROM menus WHERE menu_id = ?1",
                    params![menu_id],
                    |row| row.get(0),
                )
                .optional()?;
            let document = document.ok_or_else(|| PipelineError::not_found("menu", &menu_id))?;
            decode("menu", &menu_id, &document)
        })
        .await
    }

    async fn get_product_status(
        &self,
        restaurant_id: &str,
        product_id: &str,
    ) -> PipelineResult<ProductStatus> {
        let restaurant_id = restaurant_id.to_string();
        let product_id = product_id.to_string();
        self.with_conn(move |conn| {
            let (_, menu) = find_product_menu(conn, &restaurant_id, &product_id)?;
            menu.product(&product_id)
                .map(|product| product.status)
                .ok_or_else(|| {
                    PipelineError::not_found("product", product_key(&restaurant_id, &product_id))
                })
        })
        .await
    }

    async fn update_product_status(
        &self,
        restaurant_id: &str,
        product_id: &str,
        new_status: ProductStatus,
    ) -> PipelineResult<ProductStatus> {
        let restaurant_id = restaurant_id.to_string();
        let product_id = product_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let (seq, mut menu) = find_product_menu(&tx, &restaurant_id, &product_id)?;
            let previous = menu
                .set_product_status(&product_id, new_status)
                .ok_or_else(|| {
                    PipelineError::not_found("product", product_key(&restaurant_id, &product_id))
                })?;
            tx.execute(
                "UPDATE menus SET document = ?1 WHERE seq = ?2",
                params![encode(&menu)?, seq],
            )?;
            tx.commit()?;
            Ok(previous)
        })
        .await
    }
}

#[async_trait]
impl AuditStore for SqliteStore {
    async fn append_audit(&self, audit: &ProductStatusAudit) -> PipelineResult<()> {
        let audit = audit.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO product_status_audit(product_id, document) VALUES (?1, ?2)",
                params![audit.product_id, encode(&audit)?],
            )?;
            Ok(())
        })
        .await
    }

    async fn audits_for_product(&self, product_id: &str) -> PipelineResult<Vec<ProductStatusAudit>> {
        let product_id = product_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT document FROM product_status_audit WHERE product_id = ?1 ORDER BY seq",
            )?;
            let documents = stmt
                .query_map(params![product_id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            documents
                .iter()
                .map(|document| decode("audit", &product_id, document))
                .collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Product, ProductAttributes};
    use crate::error::ErrorKind;

    fn menu(restaurant: &str) -> Menu {
        Menu::new(
            restaurant,
            vec![Product {
                ext_id: "1001000".to_string(),
                name: "Борщ".to_string(),
                price: 350.0,
                price_old: Some(400.0),
                status: ProductStatus::Available,
                attributes: ProductAttributes {
                    options: vec!["Сметана".to_string()],
                },
            }],
            vec![],
            vec![],
        )
    }

    #[tokio::test]
    async fn test_task_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let task = ParsingTask::new("sheet-1", "Cafe");
        store.create_task(&task).await.unwrap();
        assert_eq!(store.get_task(&task.task_id).await.unwrap(), task);
    }

    #[tokio::test]
    async fn test_invalid_transition_leaves_document_untouched() {
        let store = SqliteStore::open_in_memory().unwrap();
        let task = ParsingTask::new("sheet-1", "Cafe");
        store.create_task(&task).await.unwrap();

        let error = store
            .update_task_status(&task.task_id, TaskStatus::Completed, Some("m"), None)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(
            store.get_task(&task.task_id).await.unwrap().status,
            TaskStatus::Queued
        );
    }

    #[tokio::test]
    async fn test_menu_documents_keep_unicode() {
        let store = SqliteStore::open_in_memory().unwrap();
        let saved = store.create_menu(menu("Cafe")).await.unwrap();
        let loaded = store.get_menu(saved.id.as_deref().unwrap()).await.unwrap();
        assert_eq!(loaded.products[0].name, "Борщ");
        assert_eq!(loaded, saved);
    }

    #[tokio::test]
    async fn test_update_product_status_returns_previous() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_menu(menu("Cafe")).await.unwrap();

        let previous = store
            .update_product_status("Cafe", "1001000", ProductStatus::NotAvailable)
            .await
            .unwrap();
        assert_eq!(previous, ProductStatus::Available);
        assert_eq!(
            store.get_product_status("Cafe", "1001000").await.unwrap(),
            ProductStatus::NotAvailable
        );
    }

    #[tokio::test]
    async fn test_unknown_menu_and_product() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(
            store.get_menu("missing").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            store
                .update_product_status("Cafe", "1", ProductStatus::Deleted)
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
    }
}
