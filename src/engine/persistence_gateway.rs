// ==========================================
// 卡支付结算对账 - 持久化网关
// ==========================================
// bulk_append: 补齐归属/审计字段（已有值不覆盖）后整批写入
// remove_intra_batch_duplicates: 按业务键分组保留最小 id，
//   已挂接计算结果的行永不删除; 可重复执行
// ==========================================

use crate::domain::record::CanonicalRecord;
use crate::importer::error::ImportResult;
use crate::repository::settlement_repo::SettlementTable;
use crate::repository::stores::SettlementStore;
use chrono::NaiveDateTime;
use std::sync::Arc;
use tracing::{debug, info};

/// 写入时补齐的归属与审计字段
#[derive(Debug, Clone)]
pub struct StampContext {
    pub batch_id: String,
    pub merchant_id: i64,
    pub client_id: Option<i64>,
    pub source_file: Option<String>,
    pub processed_at: NaiveDateTime,
    pub processed_by: String,
}

impl StampContext {
    /// 只填充缺失字段
    pub fn stamp(&self, record: &mut CanonicalRecord) {
        let audit = &mut record.audit;
        if audit.batch_id.is_none() {
            audit.batch_id = Some(self.batch_id.clone());
        }
        if audit.merchant_id.is_none() {
            audit.merchant_id = Some(self.merchant_id);
        }
        if audit.client_id.is_none() {
            audit.client_id = self.client_id;
        }
        if audit.source_file.is_none() {
            audit.source_file = self.source_file.clone();
        }
        if audit.processed_at.is_none() {
            audit.processed_at = Some(self.processed_at);
        }
        if audit.processed_by.is_none() {
            audit.processed_by = Some(self.processed_by.clone());
        }
    }
}

pub struct PersistenceGateway {
    store: Arc<dyn SettlementStore>,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn SettlementStore>) -> Self {
        Self { store }
    }

    pub fn bulk_append(
        &self,
        table: SettlementTable,
        records: &mut [CanonicalRecord],
        ctx: &StampContext,
    ) -> ImportResult<usize> {
        for record in records.iter_mut() {
            ctx.stamp(record);
        }
        let appended = self.store.bulk_append(table, records)?;
        debug!(table = table.table_name(), appended, "批量写入完成");
        Ok(appended)
    }

    pub fn remove_intra_batch_duplicates(
        &self,
        table: SettlementTable,
        batch_id: &str,
    ) -> ImportResult<usize> {
        let removed = self.store.remove_intra_batch_duplicates(table, batch_id)?;
        if removed > 0 {
            info!(table = table.table_name(), batch_id, removed, "批次内去重");
        }
        Ok(removed)
    }

    pub fn count_by_batch(&self, table: SettlementTable, batch_id: &str) -> ImportResult<usize> {
        Ok(self.store.count_by_batch(table, batch_id)?)
    }
}
