// ==========================================
// 卡支付结算对账 - 批次登记（BatchRegistry）
// ==========================================
// 批次 ID: "{merchant_id}_{sequence:04} - dd/mm/YYYY HH:MM:SS"
// SEQUENTIAL: 先计数后写入（两步，无隔离; 并发时后写入者触发 BatchIdCollision）
// ATOMIC: 计数与写入在同一个 IMMEDIATE 写事务内
// 级联删除顺序: 计算结果 → 已接受 → 已过滤 → 批次
// ==========================================

use crate::domain::batch::{Batch, CascadeReport};
use crate::domain::types::BatchAllocation;
use crate::importer::error::{ImportError, ImportResult};
use crate::repository::error::RepositoryError;
use crate::repository::stores::BatchStore;
use chrono::{Local, NaiveDateTime};
use std::cell::RefCell;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const BATCH_TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// 新批次的归属信息
#[derive(Debug, Clone, Default)]
pub struct NewBatch {
    pub merchant_id: i64,
    pub client_id: Option<i64>,
    pub description: Option<String>,
    pub created_by: Option<String>,
}

pub struct BatchRegistry {
    store: Arc<dyn BatchStore>,
}

impl BatchRegistry {
    pub fn new(store: Arc<dyn BatchStore>) -> Self {
        Self { store }
    }

    pub fn format_batch_id(merchant_id: i64, sequence: i64, at: NaiveDateTime) -> String {
        format!(
            "{}_{:04} - {}",
            merchant_id,
            sequence,
            at.format(BATCH_TIMESTAMP_FORMAT)
        )
    }

    /// 下一个序号 = 商户已有批次数 + 1
    pub fn next_sequence(&self, merchant_id: i64) -> ImportResult<i64> {
        Ok(self.store.count_for_merchant(merchant_id)? + 1)
    }

    /// 生成批次 ID（不写入; 与登记之间无隔离）
    pub fn generate_batch_id(&self, merchant_id: i64) -> ImportResult<String> {
        let sequence = self.next_sequence(merchant_id)?;
        Ok(Self::format_batch_id(
            merchant_id,
            sequence,
            Local::now().naive_local(),
        ))
    }

    /// 登记批次; 批次 ID 重复 → BatchIdCollision
    pub fn register_batch(&self, batch: &Batch) -> ImportResult<()> {
        self.store.insert(batch).map_err(|e| collision_or(e, &batch.batch_id))?;
        info!(batch_id = %batch.batch_id, merchant_id = batch.merchant_id, "批次已登记");
        Ok(())
    }

    /// 按分配方式生成并登记新批次
    pub fn allocate(&self, strategy: BatchAllocation, new_batch: &NewBatch) -> ImportResult<Batch> {
        let build = |sequence: i64| {
            let now = Local::now().naive_local();
            Batch {
                batch_id: Self::format_batch_id(new_batch.merchant_id, sequence, now),
                batch_uid: Uuid::new_v4().to_string(),
                merchant_id: new_batch.merchant_id,
                client_id: new_batch.client_id,
                sequence,
                description: new_batch.description.clone(),
                created_at: now,
                created_by: new_batch.created_by.clone(),
            }
        };

        match strategy {
            BatchAllocation::Sequential => {
                let batch = build(self.next_sequence(new_batch.merchant_id)?);
                debug!(batch_id = %batch.batch_id, "生成批次 ID");
                self.register_batch(&batch)?;
                Ok(batch)
            }
            BatchAllocation::Atomic => {
                // 记录事务内实际尝试写入的批次 ID，冲突时原样报告
                let attempted = RefCell::new(String::new());
                let build_tracked = |sequence: i64| {
                    let batch = build(sequence);
                    attempted.replace(batch.batch_id.clone());
                    batch
                };
                let batch = self
                    .store
                    .insert_with_next_sequence(new_batch.merchant_id, &build_tracked)
                    .map_err(|e| collision_or(e, &attempted.borrow()))?;
                info!(batch_id = %batch.batch_id, merchant_id = batch.merchant_id, "批次已登记（原子分配）");
                Ok(batch)
            }
        }
    }

    /// 追加模式: 批次必须存在且属于该商户
    pub fn find_for_merchant(&self, batch_id: &str, merchant_id: i64) -> ImportResult<Batch> {
        match self.store.find(batch_id)? {
            Some(batch) if batch.merchant_id == merchant_id => Ok(batch),
            _ => Err(ImportError::BatchNotFound(batch_id.to_string())),
        }
    }

    pub fn list_batches(&self, merchant_id: Option<i64>) -> ImportResult<Vec<Batch>> {
        Ok(self.store.list(merchant_id)?)
    }

    pub fn cascade_delete(&self, batch_id: &str) -> ImportResult<CascadeReport> {
        let report = self.store.delete_cascade(batch_id).map_err(|e| match e {
            RepositoryError::NotFound { .. } => ImportError::BatchNotFound(batch_id.to_string()),
            other => ImportError::Persistence(other),
        })?;
        info!(
            batch_id,
            calculations = report.calculations_deleted,
            accepted = report.accepted_deleted,
            filtered = report.filtered_deleted,
            "批次已级联删除"
        );
        Ok(report)
    }
}

fn collision_or(err: RepositoryError, batch_id: &str) -> ImportError {
    if err.is_unique_violation() {
        warn!(batch_id, "批次 ID 冲突");
        ImportError::BatchIdCollision(batch_id.to_string())
    } else {
        ImportError::Persistence(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_format_batch_id() {
        let at = NaiveDate::from_ymd_opt(2024, 1, 31)
            .unwrap()
            .and_hms_opt(9, 5, 7)
            .unwrap();
        assert_eq!(
            BatchRegistry::format_batch_id(7, 4, at),
            "7_0004 - 31/01/2024 09:05:07"
        );
        assert_eq!(
            BatchRegistry::format_batch_id(12, 12345, at),
            "12_12345 - 31/01/2024 09:05:07"
        );
    }
}
