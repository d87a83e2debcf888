// ==========================================
// 卡支付结算对账 - 存储接口 Trait
// ==========================================
// 职责: 定义导入管道消费的数据访问接口（不包含业务逻辑）
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::domain::batch::{Batch, CascadeReport};
use crate::domain::mapping::{ColumnMapping, MappingQuery, NewColumnMapping};
use crate::domain::merchant::{BlockedTerms, BrandWhitelist};
use crate::domain::record::CanonicalRecord;
use crate::domain::types::{CanonicalField, OriginType};
use crate::repository::error::RepositoryResult;
use crate::repository::settlement_repo::SettlementTable;
use std::collections::HashMap;

// ==========================================
// ColumnMappingStore
// ==========================================
// 实现者: ColumnMappingRepository（rusqlite）
pub trait ColumnMappingStore: Send + Sync {
    /// 按条件列出映射（空 context 不过滤）
    fn list(&self, query: &MappingQuery) -> RepositoryResult<Vec<ColumnMapping>>;

    /// 严格插入; 三元组重复 → UniqueConstraintViolation
    fn insert(&self, mapping: &NewColumnMapping) -> RepositoryResult<i64>;

    /// 三元组重复时更新标准列与启用标志
    fn upsert(&self, mapping: &NewColumnMapping) -> RepositoryResult<i64>;

    fn update(&self, id: i64, mapping: &NewColumnMapping) -> RepositoryResult<()>;

    /// 返回是否确实删除了记录
    fn delete(&self, id: i64) -> RepositoryResult<bool>;

    fn find_by_key(
        &self,
        source_name: &str,
        context: &str,
        origin_type: OriginType,
    ) -> RepositoryResult<Option<ColumnMapping>>;

    /// 启用的映射 {源列名: 标准列}; 空 context 表示全部上下文
    fn load_active_map(
        &self,
        context: &str,
        origin_type: OriginType,
    ) -> RepositoryResult<HashMap<String, CanonicalField>>;

    fn list_contexts(&self) -> RepositoryResult<Vec<String>>;
}

// ==========================================
// MerchantRuleStore
// ==========================================
// 实现者: MerchantRuleRepository
pub trait MerchantRuleStore: Send + Sync {
    fn brands_for_merchant(&self, merchant_id: i64) -> RepositoryResult<BrandWhitelist>;

    /// Upsert 启用标志，返回写入条数
    fn save_brands(&self, merchant_id: i64, entries: &[(String, bool)]) -> RepositoryResult<usize>;

    fn list_terms(&self, merchant_id: i64) -> RepositoryResult<BlockedTerms>;

    /// 返回是否新增（空词与重复词不写入）
    fn add_term(&self, merchant_id: i64, term: &str) -> RepositoryResult<bool>;

    fn remove_term(&self, merchant_id: i64, term: &str) -> RepositoryResult<bool>;
}

// ==========================================
// BatchStore
// ==========================================
// 实现者: BatchRepository
pub trait BatchStore: Send + Sync {
    fn count_for_merchant(&self, merchant_id: i64) -> RepositoryResult<i64>;

    /// 批次 ID 重复 → UniqueConstraintViolation
    fn insert(&self, batch: &Batch) -> RepositoryResult<()>;

    /// 在同一个 IMMEDIATE 事务内计数并写入
    ///
    /// build 接收下一个序号（count + 1）并构造批次
    fn insert_with_next_sequence(
        &self,
        merchant_id: i64,
        build: &dyn Fn(i64) -> Batch,
    ) -> RepositoryResult<Batch>;

    fn find(&self, batch_id: &str) -> RepositoryResult<Option<Batch>>;

    /// 按创建时间倒序; None 表示全部商户
    fn list(&self, merchant_id: Option<i64>) -> RepositoryResult<Vec<Batch>>;

    /// 依赖顺序删除: 计算 → 已接受 → 已过滤 → 批次
    fn delete_cascade(&self, batch_id: &str) -> RepositoryResult<CascadeReport>;
}

// ==========================================
// SettlementStore
// ==========================================
// 实现者: SettlementRepository（accepted_sales / filtered_sales）
pub trait SettlementStore: Send + Sync {
    fn bulk_append(
        &self,
        table: SettlementTable,
        records: &[CanonicalRecord],
    ) -> RepositoryResult<usize>;

    /// 批次内去重，返回删除条数
    fn remove_intra_batch_duplicates(
        &self,
        table: SettlementTable,
        batch_id: &str,
    ) -> RepositoryResult<usize>;

    fn count_by_batch(&self, table: SettlementTable, batch_id: &str) -> RepositoryResult<usize>;

    fn load_by_batch(
        &self,
        table: SettlementTable,
        batch_id: &str,
    ) -> RepositoryResult<Vec<CanonicalRecord>>;
}
