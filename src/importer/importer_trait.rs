// ==========================================
// 卡支付结算对账 - 导入管道 Trait
// ==========================================
// 职责: 定义管道各阶段接口（不包含实现）
// 红线: 各阶段均为纯计算，不访问存储
// ==========================================

use crate::domain::merchant::{BlockedTerms, BrandWhitelist};
use crate::domain::record::{MappedTable, NormalizationReport, Partition, RawTable};
use crate::domain::types::CanonicalField;
use crate::importer::error::ImportResult;
use std::collections::HashMap;
use std::path::Path;

// ==========================================
// FileParser Trait
// ==========================================
// 用途: 文件 → 原始表（不做表头假设，保留全部行）
// 实现者: CsvParser, ExcelParser
pub trait FileParser: Send + Sync {
    /// 解析文件为原始表
    ///
    /// # 参数
    /// - file_path: 文件路径
    /// - sheet: 工作表名（仅 Excel 有效，None 取第一个）
    fn parse_to_raw_table(&self, file_path: &Path, sheet: Option<&str>) -> ImportResult<RawTable>;
}

// ==========================================
// HeaderDetector Trait
// ==========================================
pub trait HeaderDetector: Send + Sync {
    /// 返回表头行索引（0-based）; 无满足条件的行时返回 0
    fn detect(&self, table: &RawTable, min_filled: usize) -> usize;
}

// ==========================================
// SchemaMapper Trait
// ==========================================
pub trait SchemaMapper: Send + Sync {
    /// 按映射表重命名列
    ///
    /// # 红线
    /// - 输出列数 == 输入列数（不删除、不合并列）
    fn map_columns(
        &self,
        table: &RawTable,
        header_index: usize,
        active_map: &HashMap<String, CanonicalField>,
    ) -> ImportResult<MappedTable>;
}

// ==========================================
// Normalizer Trait
// ==========================================
pub trait Normalizer: Send + Sync {
    /// 类型转换 + 审计字段; 不丢弃任何行
    ///
    /// # 返回
    /// - Err(MappingCollision): 两个源列指向同一标准列
    fn normalize(&self, table: &MappedTable, operator: &str) -> ImportResult<NormalizationReport>;
}

// ==========================================
// Classifier Trait
// ==========================================
pub trait Classifier: Send + Sync {
    /// 划分 accepted / filtered（互斥且完备）
    fn classify(
        &self,
        table: NormalizationReport,
        whitelist: &BrandWhitelist,
        terms: &BlockedTerms,
    ) -> Partition;
}
