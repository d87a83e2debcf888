// ==========================================
// 卡支付结算对账 - 导入 API
// ==========================================
// 职责: 面向调用方的门面（文件 → 预览/导入/批次管理/映射与规则维护）
// 说明: 一个 ImportApi 持有一条共享连接; 并发导入时每个任务各建一个实例
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::config::{ConfigManager, ImportConfigReader, ImportSettings};
use crate::db::open_sqlite_connection;
use crate::domain::batch::{BatchMode, BatchOverview, CascadeReport, ImportSummary};
use crate::domain::mapping::{ColumnMapping, MappingQuery, NewColumnMapping};
use crate::domain::record::{Coercion, MappingCollision};
use crate::domain::types::{CanonicalField, OriginType};
use crate::engine::{ImportOrchestrator, ImportRequest, PipelineStores};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::UniversalFileParser;
use crate::repository::{
    BatchRepository, BatchStore, ColumnMappingRepository, ColumnMappingStore,
    MerchantRuleRepository, MerchantRuleStore, SettlementRepository, SettlementStore,
    SettlementTable,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// 预览返回的样例行数
const PREVIEW_SAMPLE_ROWS: usize = 5;

/// 预览响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub file_name: String,
    pub header_index: usize,
    pub columns: Vec<String>,
    pub substitutions: BTreeMap<String, String>,
    pub collisions: Vec<MappingCollision>,
    pub data_rows: usize,
    pub sample: Vec<Vec<String>>,
}

/// 导入请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportFileRequest {
    pub file_path: String,
    pub sheet: Option<String>,
    pub merchant_id: i64,
    pub client_id: Option<i64>,
    pub context: String,
    pub origin_type: OriginType,
    pub operator: String,
    pub batch_mode: BatchMode,
    /// None 时取配置 dedupe_enabled
    pub dedupe: Option<bool>,
}

/// 导入响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportFileResponse {
    pub summary: ImportSummary,
    pub header_index: usize,
    pub substitutions: BTreeMap<String, String>,
    pub coercions: Vec<Coercion>,
    /// 批次登记尝试次数（含因 ID 冲突的重试）
    pub attempts: u32,
}

/// 批次 ID 冲突时重试，返回最终结果与尝试次数
///
/// 冲突只会发生在写入任何记录之前
fn retry_on_collision<T>(
    retry_limit: u32,
    mut attempt: impl FnMut() -> ImportResult<T>,
) -> (ImportResult<T>, u32) {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match attempt() {
            Err(ImportError::BatchIdCollision(id)) if attempts <= retry_limit => {
                warn!(batch_id = %id, attempts, "批次 ID 冲突，重新生成");
            }
            result => return (result, attempts),
        }
    }
}

/// 导入API
pub struct ImportApi {
    config: Arc<ConfigManager>,
    mappings: Arc<ColumnMappingRepository>,
    rules: Arc<MerchantRuleRepository>,
    batches: Arc<BatchRepository>,
    settlements: Arc<SettlementRepository>,
    parser: UniversalFileParser,
}

impl ImportApi {
    /// 创建新的ImportApi实例（所有仓储共用一条连接）
    pub fn new(db_path: &str) -> ApiResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| ApiError::DatabaseError(format!("打开数据库失败: {}", e)))?;
        let conn = Arc::new(Mutex::new(conn));

        Ok(Self {
            config: Arc::new(ConfigManager::from_connection(conn.clone())?),
            mappings: Arc::new(ColumnMappingRepository::from_connection(conn.clone())?),
            rules: Arc::new(MerchantRuleRepository::from_connection(conn.clone())?),
            batches: Arc::new(BatchRepository::from_connection(conn.clone())?),
            settlements: Arc::new(SettlementRepository::from_connection(conn)?),
            parser: UniversalFileParser::default(),
        })
    }

    pub fn config(&self) -> &ConfigManager {
        &self.config
    }

    pub fn settlements(&self) -> &SettlementRepository {
        &self.settlements
    }

    fn settings(&self) -> ApiResult<ImportSettings> {
        Ok(ImportSettings::load(self.config.as_ref())?)
    }

    fn orchestrator(&self, settings: ImportSettings) -> ImportOrchestrator {
        let stores = PipelineStores {
            mappings: self.mappings.clone(),
            rules: self.rules.clone(),
            batches: self.batches.clone(),
            settlements: self.settlements.clone(),
        };
        ImportOrchestrator::new(stores, settings)
    }

    fn file_name(file_path: &str) -> String {
        Path::new(file_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file_path.to_string())
    }

    // ==========================================
    // 预览 / 导入
    // ==========================================

    /// 预览: 表头位置、映射后的列、替换与冲突（不写入）
    pub fn preview_file(
        &self,
        file_path: &str,
        sheet: Option<&str>,
        context: &str,
        origin_type: OriginType,
    ) -> ApiResult<PreviewResponse> {
        let raw = self.parser.parse(file_path, sheet)?;
        let mapped = self
            .orchestrator(self.settings()?)
            .preview(&raw, context, origin_type)?;

        Ok(PreviewResponse {
            file_name: Self::file_name(file_path),
            header_index: mapped.header_index,
            data_rows: mapped.rows.len(),
            sample: mapped.rows.iter().take(PREVIEW_SAMPLE_ROWS).cloned().collect(),
            columns: mapped.columns,
            substitutions: mapped.substitutions,
            collisions: mapped.collisions,
        })
    }

    /// 导入文件
    ///
    /// 批次 ID 冲突时重新生成，最多重试 batch_id_retry_limit 次
    pub fn import_file(&self, request: &ImportFileRequest) -> ApiResult<ImportFileResponse> {
        if request.file_path.trim().is_empty() {
            return Err(ApiError::InvalidInput("文件路径不能为空".to_string()));
        }

        let settings = self.settings()?;
        let retry_limit = settings.batch_id_retry_limit;
        let dedupe = request.dedupe.unwrap_or(settings.dedupe_enabled);
        let orchestrator = self.orchestrator(settings);

        let raw = self.parser.parse(&request.file_path, request.sheet.as_deref())?;
        let mapped = orchestrator.preview(&raw, &request.context, request.origin_type)?;
        let report = orchestrator.normalize(&mapped, &request.operator)?;
        let coercions = report.coercions.clone();

        let import_request = ImportRequest {
            merchant_id: request.merchant_id,
            client_id: request.client_id,
            context: request.context.clone(),
            origin_type: request.origin_type,
            operator: request.operator.clone(),
            source_file: Some(Self::file_name(&request.file_path)),
            batch_mode: request.batch_mode.clone(),
            dedupe,
        };

        let (result, attempts) = retry_on_collision(retry_limit, || {
            orchestrator.classify_and_persist(report.clone(), &import_request)
        });
        let summary = result?;

        info!(
            file = %request.file_path,
            batch_id = %summary.batch_id,
            attempts,
            "文件导入完成"
        );

        Ok(ImportFileResponse {
            summary,
            header_index: mapped.header_index,
            substitutions: mapped.substitutions,
            coercions,
            attempts,
        })
    }

    // ==========================================
    // 批次
    // ==========================================

    pub fn delete_batch(&self, batch_id: &str) -> ApiResult<CascadeReport> {
        let batch_id = batch_id.trim();
        if batch_id.is_empty() {
            return Err(ApiError::InvalidInput("批次 ID 不能为空".to_string()));
        }
        Ok(self.orchestrator(self.settings()?).cascade_delete(batch_id)?)
    }

    /// 批次列表（新到旧）及各表行数
    pub fn list_batches(&self, merchant_id: Option<i64>) -> ApiResult<Vec<BatchOverview>> {
        let batches = self.batches.list(merchant_id)?;
        batches
            .into_iter()
            .map(|batch| {
                let accepted_rows = self
                    .settlements
                    .count_by_batch(SettlementTable::Accepted, &batch.batch_id)?;
                let filtered_rows = self
                    .settlements
                    .count_by_batch(SettlementTable::Filtered, &batch.batch_id)?;
                Ok(BatchOverview {
                    batch,
                    accepted_rows,
                    filtered_rows,
                })
            })
            .collect()
    }

    // ==========================================
    // 列映射
    // ==========================================

    pub fn list_mappings(&self, query: &MappingQuery) -> ApiResult<Vec<ColumnMapping>> {
        Ok(self.mappings.list(query)?)
    }

    /// strict = true 时三元组重复报错，否则更新已有映射
    pub fn save_mapping(&self, mapping: &NewColumnMapping, strict: bool) -> ApiResult<i64> {
        let id = if strict {
            self.mappings.insert(mapping)?
        } else {
            self.mappings.upsert(mapping)?
        };
        Ok(id)
    }

    pub fn update_mapping(&self, id: i64, mapping: &NewColumnMapping) -> ApiResult<()> {
        Ok(self.mappings.update(id, mapping)?)
    }

    pub fn delete_mapping(&self, id: i64) -> ApiResult<()> {
        if !self.mappings.delete(id)? {
            return Err(ApiError::NotFound(format!("映射 id={}", id)));
        }
        Ok(())
    }

    pub fn list_contexts(&self) -> ApiResult<Vec<String>> {
        Ok(self.mappings.list_contexts()?)
    }

    /// 可作为映射目标的标准字段
    pub fn list_mappable_fields(&self) -> Vec<CanonicalField> {
        CanonicalField::mappable_fields()
    }

    // ==========================================
    // 商户规则
    // ==========================================

    pub fn brands(&self, merchant_id: i64) -> ApiResult<Vec<(String, bool)>> {
        Ok(self.rules.brands_for_merchant(merchant_id)?.entries())
    }

    pub fn save_brands(&self, merchant_id: i64, entries: &[(String, bool)]) -> ApiResult<usize> {
        Ok(self.rules.save_brands(merchant_id, entries)?)
    }

    pub fn list_terms(&self, merchant_id: i64) -> ApiResult<Vec<String>> {
        Ok(self
            .rules
            .list_terms(merchant_id)?
            .iter()
            .map(str::to_string)
            .collect())
    }

    pub fn add_term(&self, merchant_id: i64, term: &str) -> ApiResult<bool> {
        if term.trim().is_empty() {
            return Err(ApiError::InvalidInput("屏蔽词不能为空".to_string()));
        }
        Ok(self.rules.add_term(merchant_id, term)?)
    }

    pub fn remove_term(&self, merchant_id: i64, term: &str) -> ApiResult<bool> {
        Ok(self.rules.remove_term(merchant_id, term)?)
    }

    /// 当前导入配置快照
    pub fn current_settings(&self) -> ApiResult<ImportSettings> {
        self.settings()
    }

    /// 读取单个配置（无则 None）
    pub fn config_value(&self, key: &str) -> ApiResult<Option<String>> {
        Ok(self.config.get_global_config_value(key)?)
    }

    /// 表头阈值（便于 CLI 展示）
    pub fn header_min_filled(&self) -> ApiResult<usize> {
        Ok(self.config.get_header_min_filled()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_until_success() {
        let mut calls = 0;
        let (result, attempts) = retry_on_collision(3, || {
            calls += 1;
            if calls < 3 {
                Err(ImportError::BatchIdCollision(format!("7_000{}", calls)))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_retry_gives_up_after_limit() {
        let (result, attempts) = retry_on_collision(2, || -> ImportResult<()> {
            Err(ImportError::BatchIdCollision("7_0001".into()))
        });
        assert!(matches!(result, Err(ImportError::BatchIdCollision(_))));
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let (result, attempts) = retry_on_collision(5, || -> ImportResult<()> {
            Err(ImportError::BatchNotFound("x".into()))
        });
        assert!(matches!(result, Err(ImportError::BatchNotFound(_))));
        assert_eq!(attempts, 1);
    }
}
