// ==========================================
// 卡支付结算对账 - 导入批次
// ==========================================
// 批次 ID 格式: "{商户}_{序号:04} - dd/mm/YYYY HH:MM:SS"
// 红线: 批次 ID 全局唯一，删除批次必须级联
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// Batch - 导入批次
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: String,            // 人类可读 ID
    pub batch_uid: String,           // 内部 UUID
    pub merchant_id: i64,            // 商户
    pub client_id: Option<i64>,      // 客户
    pub sequence: i64,               // 商户内序号（从 1 开始）
    pub description: Option<String>, // 批次说明
    pub created_at: NaiveDateTime,
    pub created_by: Option<String>,
}

/// 批次模式: 新建批次 / 追加到已有批次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchMode {
    New { description: Option<String> },
    Existing(String),
}

impl Default for BatchMode {
    fn default() -> Self {
        BatchMode::New { description: None }
    }
}

// ==========================================
// ImportSummary - 一次导入的结果
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub batch_id: String,
    pub accepted_count: usize,
    pub filtered_count: usize,
    pub total: usize,
    pub duplicates_removed: usize,
    pub coercion_count: usize,
}

/// 批次概览（列表展示用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOverview {
    pub batch: Batch,
    pub accepted_rows: usize,
    pub filtered_rows: usize,
}

/// 级联删除报告
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CascadeReport {
    pub batch_id: String,
    pub calculations_deleted: usize,
    pub filtered_deleted: usize,
    pub accepted_deleted: usize,
}

impl CascadeReport {
    pub fn total_rows(&self) -> usize {
        self.calculations_deleted + self.filtered_deleted + self.accepted_deleted
    }
}
