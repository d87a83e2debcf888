// ==========================================
// 卡支付结算对账 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 结算文件导入管道（表头检测 → 列映射 → 标准化 → 分类 → 落库）
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 批次与编排
pub mod engine;

// 导入层 - 文件解析与管道组件
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA/表结构）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{BatchAllocation, CanonicalField, FieldKind, FieldValue, OriginType};

// 领域实体
pub use domain::{
    Batch, BatchMode, BlockedTerms, BrandWhitelist, CanonicalRecord, ColumnMapping,
    ImportSummary, MappedTable, NormalizationReport, Partition, RawTable,
};

// 引擎
pub use engine::{BatchRegistry, ImportOrchestrator, ImportRequest, PersistenceGateway};

// API
pub use api::{ApiError, ImportApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "卡支付结算对账";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert!(!APP_NAME.is_empty());
    }
}
