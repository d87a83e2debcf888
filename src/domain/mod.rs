// ==========================================
// 卡支付结算对账 - 领域模型层
// ==========================================
// 职责: 定义字段注册表、记录、批次、商户规则
// 红线: 不含数据访问逻辑,不含管道逻辑
// ==========================================

pub mod batch;
pub mod mapping;
pub mod merchant;
pub mod record;
pub mod types;

// 重导出核心类型
pub use batch::{Batch, BatchMode, BatchOverview, CascadeReport, ImportSummary};
pub use mapping::{ColumnMapping, MappingQuery, NewColumnMapping};
pub use merchant::{BlockedTerms, BrandWhitelist};
pub use record::{
    AuditFields, CanonicalRecord, Coercion, CoercionKind, ColumnKey, FilterReason, MappedTable,
    MappingCollision, NormalizationReport, Partition, RawTable,
};
pub use types::{BatchAllocation, CanonicalField, FieldKind, FieldValue, OriginType};
