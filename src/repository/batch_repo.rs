// ==========================================
// 卡支付结算对账 - 导入批次仓储
// ==========================================
// 职责: 管理 settlement_batches 表 + 批次级联删除
// 红线: batch_id 由主键强制唯一（不仅仅依赖生成逻辑）
// ==========================================

use crate::db::{ensure_schema, open_sqlite_connection};
use crate::domain::batch::{Batch, CascadeReport};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::stores::BatchStore;
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::sync::{Arc, Mutex};

const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SELECT_COLUMNS: &str =
    "batch_id, batch_uid, merchant_id, client_id, sequence, description, created_at, created_by";

fn map_batch(row: &rusqlite::Row<'_>) -> rusqlite::Result<Batch> {
    let created_at: String = row.get(6)?;
    let created_at = NaiveDateTime::parse_from_str(&created_at, STAMP_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Batch {
        batch_id: row.get(0)?,
        batch_uid: row.get(1)?,
        merchant_id: row.get(2)?,
        client_id: row.get(3)?,
        sequence: row.get(4)?,
        description: row.get(5)?,
        created_at,
        created_by: row.get(7)?,
    })
}

fn insert_batch(conn: &Connection, batch: &Batch) -> rusqlite::Result<usize> {
    conn.execute(
        r#"
        INSERT INTO settlement_batches (
            batch_id, batch_uid, merchant_id, client_id,
            sequence, description, created_at, created_by
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
        params![
            batch.batch_id,
            batch.batch_uid,
            batch.merchant_id,
            batch.client_id,
            batch.sequence,
            batch.description,
            batch.created_at.format(STAMP_FORMAT).to_string(),
            batch.created_by,
        ],
    )
}

pub struct BatchRepository {
    conn: Arc<Mutex<Connection>>,
}

impl BatchRepository {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        let repo = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        repo.ensure_table()?;
        Ok(repo)
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        let repo = Self { conn };
        repo.ensure_table()?;
        Ok(repo)
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn ensure_table(&self) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        ensure_schema(&conn)?;
        Ok(())
    }
}

impl BatchStore for BatchRepository {
    fn count_for_merchant(&self, merchant_id: i64) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM settlement_batches WHERE merchant_id = ?1",
            params![merchant_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn insert(&self, batch: &Batch) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        insert_batch(&conn, batch)?;
        Ok(())
    }

    fn insert_with_next_sequence(
        &self,
        merchant_id: i64,
        build: &dyn Fn(i64) -> Batch,
    ) -> RepositoryResult<Batch> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM settlement_batches WHERE merchant_id = ?1",
            params![merchant_id],
            |row| row.get(0),
        )?;
        let batch = build(count + 1);
        insert_batch(&tx, &batch)?;

        tx.commit()?;
        Ok(batch)
    }

    fn find(&self, batch_id: &str) -> RepositoryResult<Option<Batch>> {
        let conn = self.get_conn()?;
        let batch = conn
            .query_row(
                &format!(
                    "SELECT {} FROM settlement_batches WHERE batch_id = ?1",
                    SELECT_COLUMNS
                ),
                params![batch_id],
                map_batch,
            )
            .optional()?;
        Ok(batch)
    }

    fn list(&self, merchant_id: Option<i64>) -> RepositoryResult<Vec<Batch>> {
        let conn = self.get_conn()?;
        let batches = match merchant_id {
            Some(id) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM settlement_batches WHERE merchant_id = ?1 \
                     ORDER BY created_at DESC, sequence DESC",
                    SELECT_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![id], map_batch)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM settlement_batches \
                     ORDER BY created_at DESC, merchant_id, sequence DESC",
                    SELECT_COLUMNS
                ))?;
                let rows = stmt
                    .query_map([], map_batch)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(batches)
    }

    fn delete_cascade(&self, batch_id: &str) -> RepositoryResult<CascadeReport> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let calculations_deleted = tx.execute(
            r#"
            DELETE FROM sales_calculations
            WHERE sale_id IN (SELECT id FROM accepted_sales WHERE batch_id = ?1)
            "#,
            params![batch_id],
        )?;
        let accepted_deleted =
            tx.execute("DELETE FROM accepted_sales WHERE batch_id = ?1", params![batch_id])?;
        let filtered_deleted =
            tx.execute("DELETE FROM filtered_sales WHERE batch_id = ?1", params![batch_id])?;
        let batch_deleted = tx.execute(
            "DELETE FROM settlement_batches WHERE batch_id = ?1",
            params![batch_id],
        )?;

        if batch_deleted == 0 && calculations_deleted + accepted_deleted + filtered_deleted == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Batch".to_string(),
                id: batch_id.to_string(),
            });
        }

        tx.commit()?;
        Ok(CascadeReport {
            batch_id: batch_id.to_string(),
            calculations_deleted,
            filtered_deleted,
            accepted_deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn setup() -> BatchRepository {
        let conn = Connection::open_in_memory().unwrap();
        BatchRepository::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    fn batch(id: &str, merchant_id: i64, sequence: i64) -> Batch {
        Batch {
            batch_id: id.to_string(),
            batch_uid: uuid::Uuid::new_v4().to_string(),
            merchant_id,
            client_id: Some(1),
            sequence,
            description: None,
            created_at: NaiveDate::from_ymd_opt(2024, 1, 31)
                .unwrap()
                .and_hms_opt(10, 0, sequence as u32)
                .unwrap(),
            created_by: Some("ana".to_string()),
        }
    }

    #[test]
    fn test_insert_count_and_find() {
        let repo = setup();
        repo.insert(&batch("7_0001 - x", 7, 1)).unwrap();
        repo.insert(&batch("7_0002 - x", 7, 2)).unwrap();
        repo.insert(&batch("8_0001 - x", 8, 1)).unwrap();

        assert_eq!(repo.count_for_merchant(7).unwrap(), 2);
        assert_eq!(repo.count_for_merchant(9).unwrap(), 0);

        let found = repo.find("7_0002 - x").unwrap().unwrap();
        assert_eq!(found.sequence, 2);
        assert_eq!(found.created_by.as_deref(), Some("ana"));
        assert!(repo.find("nope").unwrap().is_none());

        let listed = repo.list(Some(7)).unwrap();
        assert_eq!(listed[0].batch_id, "7_0002 - x");
        assert_eq!(repo.list(None).unwrap().len(), 3);
    }

    #[test]
    fn test_duplicate_batch_id_is_unique_violation() {
        let repo = setup();
        repo.insert(&batch("7_0001 - x", 7, 1)).unwrap();
        let err = repo.insert(&batch("7_0001 - x", 7, 1)).unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn test_insert_with_next_sequence() {
        let repo = setup();
        repo.insert(&batch("7_0001 - x", 7, 1)).unwrap();

        let created = repo
            .insert_with_next_sequence(7, &|seq| batch(&format!("7_{:04} - y", seq), 7, seq))
            .unwrap();
        assert_eq!(created.sequence, 2);
        assert_eq!(created.batch_id, "7_0002 - y");
        assert_eq!(repo.count_for_merchant(7).unwrap(), 2);
    }

    #[test]
    fn test_delete_cascade_unknown_batch() {
        let repo = setup();
        assert!(matches!(
            repo.delete_cascade("missing"),
            Err(RepositoryError::NotFound { .. })
        ));
    }
}
