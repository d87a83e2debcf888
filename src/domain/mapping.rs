// ==========================================
// 卡支付结算对账 - 列映射实体
// ==========================================
// 用途: 源文件列名 → 标准列名 的映射规则
// 唯一键: (source_name, context, origin_type)
// ==========================================

use crate::domain::types::{CanonicalField, OriginType};
use serde::{Deserialize, Serialize};

// ==========================================
// ColumnMapping - 已持久化的映射规则
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub id: i64,
    pub source_name: String,           // 源列名（已去首尾空白）
    pub canonical_name: CanonicalField, // 标准列
    pub context: String,               // 上下文（通常为收单机构/文件布局）
    pub origin_type: OriginType,       // V=销售 / L=应收
    pub active: bool,
    pub created_by: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

// ==========================================
// NewColumnMapping - 待写入的映射规则
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewColumnMapping {
    pub source_name: String,
    pub canonical_name: CanonicalField,
    pub context: String,
    pub origin_type: OriginType,
    pub active: bool,
    pub created_by: Option<String>,
}

impl NewColumnMapping {
    pub fn new(
        source_name: impl Into<String>,
        canonical_name: CanonicalField,
        context: impl Into<String>,
    ) -> Self {
        Self {
            source_name: source_name.into().trim().to_string(),
            canonical_name,
            context: context.into().trim().to_string(),
            origin_type: OriginType::default(),
            active: true,
            created_by: None,
        }
    }

    pub fn with_origin(mut self, origin_type: OriginType) -> Self {
        self.origin_type = origin_type;
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.created_by = Some(author.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// 映射查询条件; 空 context 表示不过滤
#[derive(Debug, Clone, Default)]
pub struct MappingQuery {
    pub context: Option<String>,
    pub origin_type: Option<OriginType>,
    pub active_only: bool,
}

impl MappingQuery {
    pub fn normalized_context(&self) -> Option<&str> {
        self.context
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_mapping_trims() {
        let m = NewColumnMapping::new("  Valor Bruto ", CanonicalField::SaleAmount, " CIELO ")
            .with_author("ana");
        assert_eq!(m.source_name, "Valor Bruto");
        assert_eq!(m.context, "CIELO");
        assert_eq!(m.origin_type, OriginType::Sales);
        assert!(m.active);
        assert_eq!(m.created_by.as_deref(), Some("ana"));
    }

    #[test]
    fn test_query_blank_context_means_no_filter() {
        let q = MappingQuery {
            context: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(q.normalized_context(), None);
    }
}
