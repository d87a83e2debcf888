// ==========================================
// 卡支付结算对账 - 导入编排器
// ==========================================
// 用途: 组合 表头检测 → 列映射 → 标准化 → 分类 → 批次登记/持久化
// 说明: 单次调用内顺序执行，步骤间无跨步事务
// 红线: 中途失败不回滚，已写入部分保留; 调用方用 cascade_delete 清理后重试
// ==========================================

use crate::config::ImportSettings;
use crate::domain::batch::{Batch, BatchMode, CascadeReport, ImportSummary};
use crate::domain::record::{MappedTable, NormalizationReport, RawTable};
use crate::domain::types::OriginType;
use crate::engine::batch_registry::{BatchRegistry, NewBatch};
use crate::engine::persistence_gateway::{PersistenceGateway, StampContext};
use crate::importer::error::ImportResult;
use crate::importer::{
    BrandTermClassifier, Classifier, ContextSchemaMapper, FieldNormalizer,
    FilledCountHeaderDetector, HeaderDetector, Normalizer, SchemaMapper, UNKNOWN_OPERATOR,
};
use crate::repository::settlement_repo::SettlementTable;
use crate::repository::stores::{BatchStore, ColumnMappingStore, MerchantRuleStore, SettlementStore};
use chrono::Local;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

// ==========================================
// PipelineStores - 管道依赖的存储
// ==========================================
#[derive(Clone)]
pub struct PipelineStores {
    pub mappings: Arc<dyn ColumnMappingStore>,
    pub rules: Arc<dyn MerchantRuleStore>,
    pub batches: Arc<dyn BatchStore>,
    pub settlements: Arc<dyn SettlementStore>,
}

// ==========================================
// ImportRequest - 一次导入的归属信息
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct ImportRequest {
    pub merchant_id: i64,
    pub client_id: Option<i64>,
    pub context: String,
    pub origin_type: OriginType,
    pub operator: String,
    pub source_file: Option<String>,
    pub batch_mode: BatchMode,
    pub dedupe: bool,
}

impl ImportRequest {
    /// 新批次的默认说明
    fn default_description(&self) -> String {
        let context = match self.context.trim() {
            "" => "-",
            c => c,
        };
        format!(
            "导入 {} ({})",
            context,
            self.source_file.as_deref().unwrap_or("文件")
        )
    }

    fn operator(&self) -> String {
        match self.operator.trim() {
            "" => UNKNOWN_OPERATOR.to_string(),
            op => op.to_string(),
        }
    }
}

// ==========================================
// ImportOrchestrator - 导入编排器
// ==========================================
pub struct ImportOrchestrator {
    header_detector: Box<dyn HeaderDetector>,
    schema_mapper: Box<dyn SchemaMapper>,
    normalizer: Box<dyn Normalizer>,
    classifier: Box<dyn Classifier>,
    mappings: Arc<dyn ColumnMappingStore>,
    rules: Arc<dyn MerchantRuleStore>,
    registry: BatchRegistry,
    gateway: PersistenceGateway,
    settings: ImportSettings,
}

impl ImportOrchestrator {
    /// 使用默认管道组件创建编排器
    pub fn new(stores: PipelineStores, settings: ImportSettings) -> Self {
        Self {
            header_detector: Box::new(FilledCountHeaderDetector),
            schema_mapper: Box::new(ContextSchemaMapper),
            normalizer: Box::new(FieldNormalizer::new(&settings.date_format)),
            classifier: Box::new(BrandTermClassifier),
            mappings: stores.mappings,
            rules: stores.rules,
            registry: BatchRegistry::new(stores.batches),
            gateway: PersistenceGateway::new(stores.settlements),
            settings,
        }
    }

    /// 替换标准化组件（例如固定处理时间）
    pub fn with_normalizer(mut self, normalizer: Box<dyn Normalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    pub fn registry(&self) -> &BatchRegistry {
        &self.registry
    }

    /// 预览: 检测表头 + 映射列（不写入）
    #[instrument(skip(self, table), fields(rows = table.len()))]
    pub fn preview(
        &self,
        table: &RawTable,
        context: &str,
        origin_type: OriginType,
    ) -> ImportResult<MappedTable> {
        let header_index = self
            .header_detector
            .detect(table, self.settings.header_min_filled);
        let active_map = self.mappings.load_active_map(context, origin_type)?;
        debug!(header_index, mappings = active_map.len(), "加载映射");

        self.schema_mapper.map_columns(table, header_index, &active_map)
    }

    pub fn normalize(&self, mapped: &MappedTable, operator: &str) -> ImportResult<NormalizationReport> {
        self.normalizer.normalize(mapped, operator)
    }

    /// 分类并持久化
    ///
    /// # 步骤
    /// 1. 登记新批次（或校验追加的已有批次）
    /// 2. 分类
    /// 3. 补齐归属/审计字段
    /// 4. 写入非空分区（两者皆空时批次仍已登记）
    /// 5. dedupe 时对两张表做本批次内去重
    ///
    /// # 错误
    /// - BatchIdCollision: 登记时批次 ID 冲突（此时尚未写入任何记录）
    /// - Persistence: 存储失败（已写入部分保留）
    #[instrument(skip(self, table, req), fields(
        merchant_id = req.merchant_id,
        rows = table.len(),
        source_file = ?req.source_file
    ))]
    pub fn classify_and_persist(
        &self,
        table: NormalizationReport,
        req: &ImportRequest,
    ) -> ImportResult<ImportSummary> {
        self.run_classify_and_persist(table, req).map_err(|e| {
            error!(error = %e, "分类/持久化失败");
            e
        })
    }

    fn run_classify_and_persist(
        &self,
        table: NormalizationReport,
        req: &ImportRequest,
    ) -> ImportResult<ImportSummary> {
        let operator = req.operator();
        let coercion_count = table.coercions.len();

        // 1. 批次
        let batch: Batch = match &req.batch_mode {
            BatchMode::New { description } => self.registry.allocate(
                self.settings.batch_allocation,
                &NewBatch {
                    merchant_id: req.merchant_id,
                    client_id: req.client_id,
                    description: Some(
                        description
                            .clone()
                            .unwrap_or_else(|| req.default_description()),
                    ),
                    created_by: Some(operator.clone()),
                },
            )?,
            BatchMode::Existing(batch_id) => {
                let batch = self.registry.find_for_merchant(batch_id, req.merchant_id)?;
                debug!(batch_id = %batch.batch_id, "追加到已有批次");
                batch
            }
        };

        // 2. 分类
        let whitelist = self.rules.brands_for_merchant(req.merchant_id)?;
        let terms = self.rules.list_terms(req.merchant_id)?;
        let mut partition = self.classifier.classify(table, &whitelist, &terms);

        // 3-4. 补齐字段并写入
        let ctx = StampContext {
            batch_id: batch.batch_id.clone(),
            merchant_id: req.merchant_id,
            client_id: req.client_id.or(batch.client_id),
            source_file: req.source_file.clone(),
            processed_at: Local::now().naive_local(),
            processed_by: operator,
        };

        let accepted_count = if partition.accepted.is_empty() {
            0
        } else {
            self.gateway
                .bulk_append(SettlementTable::Accepted, &mut partition.accepted, &ctx)?
        };
        let filtered_count = if partition.filtered.is_empty() {
            0
        } else {
            self.gateway
                .bulk_append(SettlementTable::Filtered, &mut partition.filtered, &ctx)?
        };

        // 5. 去重（仅本批次）
        let mut duplicates_removed = 0;
        if req.dedupe {
            duplicates_removed += self
                .gateway
                .remove_intra_batch_duplicates(SettlementTable::Accepted, &batch.batch_id)?;
            duplicates_removed += self
                .gateway
                .remove_intra_batch_duplicates(SettlementTable::Filtered, &batch.batch_id)?;
        }

        let summary = ImportSummary {
            batch_id: batch.batch_id,
            accepted_count,
            filtered_count,
            total: accepted_count + filtered_count,
            duplicates_removed,
            coercion_count,
        };
        info!(
            batch_id = %summary.batch_id,
            accepted = summary.accepted_count,
            filtered = summary.filtered_count,
            duplicates_removed = summary.duplicates_removed,
            "导入完成"
        );
        Ok(summary)
    }

    /// 完整管道: 预览 → 标准化 → 分类/持久化
    pub fn run(&self, raw: &RawTable, req: &ImportRequest) -> ImportResult<ImportSummary> {
        let mapped = self.preview(raw, &req.context, req.origin_type)?;
        let report = self.normalize(&mapped, &req.operator)?;
        self.classify_and_persist(report, req)
    }

    pub fn cascade_delete(&self, batch_id: &str) -> ImportResult<CascadeReport> {
        self.registry.cascade_delete(batch_id)
    }
}
