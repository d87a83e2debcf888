// ==========================================
// 卡支付结算对账 - 分类（Classifier）
// ==========================================
// a. 卡组织检查: 表中有 brand 列时，仅白名单内且启用的值通过（缺省拒绝）
//    表中无 brand 列时视为通过
// b. 屏蔽词检查: 按优先级拼接 {交易摘要, 支付方式, 销售渠道, 状态} 中存在的列，
//    均不存在时拼接整行; 小写后子串匹配（不要求词边界）
// c. 任一检查失败 → filtered，否则 → accepted
// 红线: 分区互斥且完备
// ==========================================

use crate::domain::merchant::{BlockedTerms, BrandWhitelist};
use crate::domain::record::{
    CanonicalRecord, ColumnKey, FilterReason, NormalizationReport, Partition,
};
use crate::domain::types::{CanonicalField, FieldValue};
use crate::importer::importer_trait::Classifier;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default)]
pub struct BrandTermClassifier;

impl BrandTermClassifier {
    fn check_brand(record: &CanonicalRecord, whitelist: &BrandWhitelist) -> Option<FilterReason> {
        match record.get(CanonicalField::Brand) {
            FieldValue::Text(brand) if whitelist.is_active(brand) => None,
            FieldValue::Missing => Some(FilterReason::InactiveBrand(String::new())),
            other => Some(FilterReason::InactiveBrand(other.to_string())),
        }
    }

    fn search_text(record: &CanonicalRecord, columns: &[ColumnKey]) -> String {
        columns
            .iter()
            .map(|c| record.text_of(c))
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

impl Classifier for BrandTermClassifier {
    fn classify(
        &self,
        table: NormalizationReport,
        whitelist: &BrandWhitelist,
        terms: &BlockedTerms,
    ) -> Partition {
        let has_brand = table.has_column(CanonicalField::Brand);

        let priority: Vec<ColumnKey> = CanonicalField::TERM_SEARCH_FIELDS
            .iter()
            .filter(|f| table.has_column(**f))
            .map(|f| ColumnKey::Canonical(*f))
            .collect();
        let search_columns: &[ColumnKey] = if priority.is_empty() {
            &table.columns
        } else {
            &priority
        };
        debug!(
            has_brand,
            search_columns = search_columns.len(),
            full_row = priority.is_empty(),
            "分类规则"
        );

        let mut partition = Partition::default();
        for mut record in table.records {
            let brand_failure = if has_brand {
                Self::check_brand(&record, whitelist)
            } else {
                None
            };

            let reason = brand_failure.or_else(|| {
                if terms.is_empty() {
                    return None;
                }
                let text = Self::search_text(&record, search_columns);
                terms
                    .first_match(&text)
                    .map(|t| FilterReason::BlockedTerm(t.to_string()))
            });

            match reason {
                Some(reason) => {
                    record.filter_reason = Some(reason);
                    partition.filtered.push(record);
                }
                None => partition.accepted.push(record),
            }
        }

        info!(
            accepted = partition.accepted.len(),
            filtered = partition.filtered.len(),
            "分类完成"
        );
        partition
    }
}
