// ==========================================
// 卡支付结算对账 - 导入配置读取 Trait
// ==========================================
// 职责: 定义导入管道所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::domain::types::BatchAllocation;
use crate::importer::error::ImportResult;

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
pub trait ImportConfigReader: Send + Sync {
    /// 表头判定阈值（非空单元格数需严格大于该值）
    ///
    /// # 默认值
    /// - 10
    fn get_header_min_filled(&self) -> ImportResult<usize>;

    /// 日期解析格式（chrono 格式串）
    ///
    /// # 默认值
    /// - %d/%m/%Y
    fn get_date_format(&self) -> ImportResult<String>;

    /// 是否在落库后执行批次内去重
    ///
    /// # 默认值
    /// - true
    fn get_dedupe_enabled(&self) -> ImportResult<bool>;

    /// BatchIdCollision 后重新生成批次 ID 的最大次数
    ///
    /// # 默认值
    /// - 3
    fn get_batch_id_retry_limit(&self) -> ImportResult<u32>;

    /// 批次序号分配方式
    ///
    /// # 默认值
    /// - SEQUENTIAL（先计数后写入，存在已知竞态）
    fn get_batch_allocation(&self) -> ImportResult<BatchAllocation>;
}

/// 一次导入使用的配置快照
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSettings {
    pub header_min_filled: usize,
    pub date_format: String,
    pub dedupe_enabled: bool,
    pub batch_id_retry_limit: u32,
    pub batch_allocation: BatchAllocation,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            header_min_filled: 10,
            date_format: "%d/%m/%Y".to_string(),
            dedupe_enabled: true,
            batch_id_retry_limit: 3,
            batch_allocation: BatchAllocation::Sequential,
        }
    }
}

impl ImportSettings {
    pub fn load(reader: &dyn ImportConfigReader) -> ImportResult<Self> {
        Ok(Self {
            header_min_filled: reader.get_header_min_filled()?,
            date_format: reader.get_date_format()?,
            dedupe_enabled: reader.get_dedupe_enabled()?,
            batch_id_retry_limit: reader.get_batch_id_retry_limit()?,
            batch_allocation: reader.get_batch_allocation()?,
        })
    }
}
