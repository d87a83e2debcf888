// ==========================================
// 卡支付结算对账 - 引擎层
// ==========================================
// 职责: 批次登记、持久化、管道编排
// 红线: Engine 不拼 SQL，存储访问全部经由 repository 的 trait
// ==========================================

pub mod batch_registry;
pub mod orchestrator;
pub mod persistence_gateway;

// 重导出核心引擎
pub use batch_registry::{BatchRegistry, NewBatch, BATCH_TIMESTAMP_FORMAT};
pub use orchestrator::{ImportOrchestrator, ImportRequest, PipelineStores};
pub use persistence_gateway::{PersistenceGateway, StampContext};
