// ==========================================
// 卡支付结算对账 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有取值使用参数化,表名/列名仅来自字段注册表常量
// ==========================================

pub mod batch_repo;
pub mod calculation_repo;
pub mod column_mapping_repo;
pub mod error;
pub mod merchant_rule_repo;
pub mod settlement_repo;
pub mod stores;

// 重导出核心仓储
pub use batch_repo::BatchRepository;
pub use calculation_repo::{CalculationRepository, SaleCalculation};
pub use column_mapping_repo::ColumnMappingRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use merchant_rule_repo::MerchantRuleRepository;
pub use settlement_repo::{SettlementRepository, SettlementTable};
pub use stores::{BatchStore, ColumnMappingStore, MerchantRuleStore, SettlementStore};
