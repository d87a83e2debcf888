// ==========================================
// 卡支付结算对账 - 费用计算结果仓储
// ==========================================
// 职责: 管理 sales_calculations 表（下游计算结果）
// 说明: 计算行通过 sale_id 引用 accepted_sales.id
// ==========================================

use crate::db::{ensure_schema, open_sqlite_connection};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// 单条计算结果（登记值 vs 日志值）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaleCalculation {
    pub sale_id: i64,
    pub calc_id: String,
    pub calc_user: Option<String>,
    pub fee_registered: Option<f64>,
    pub discount_registered: Option<f64>,
    pub net_registered: Option<f64>,
    pub fee_logged: Option<f64>,
    pub discount_logged: Option<f64>,
    pub net_logged: Option<f64>,
}

pub struct CalculationRepository {
    conn: Arc<Mutex<Connection>>,
}

impl CalculationRepository {
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

    /// 批量写入计算结果（事务化）
    ///
    /// sale_id 不存在时触发外键约束，整个事务回滚
    pub fn batch_insert(&self, calcs: &[SaleCalculation]) -> RepositoryResult<usize> {
        if calcs.is_empty() {
            return Ok(0);
        }

        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO sales_calculations (
                        sale_id, calc_id, calc_user,
                        fee_registered, discount_registered, net_registered,
                        fee_logged, discount_logged, net_logged
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )?;

            for c in calcs {
                stmt.execute(params![
                    c.sale_id,
                    c.calc_id,
                    c.calc_user,
                    c.fee_registered,
                    c.discount_registered,
                    c.net_registered,
                    c.fee_logged,
                    c.discount_logged,
                    c.net_logged,
                ])?;
            }
        }
        tx.commit()?;
        Ok(calcs.len())
    }

    /// 引用指定批次已接受行的计算结果数量
    pub fn count_by_batch(&self, batch_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            r#"
            SELECT COUNT(*) FROM sales_calculations
            WHERE sale_id IN (SELECT id FROM accepted_sales WHERE batch_id = ?1)
            "#,
            params![batch_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
