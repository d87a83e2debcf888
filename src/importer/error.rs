// ==========================================
// 卡支付结算对账 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 对外暴露: BatchIdCollision / Persistence（由调用方决定重试或放弃）
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("文件不存在: {0}")]
    FileNotFound(String),

    #[error("文件格式不支持: {0}（仅支持 .xlsx/.xls/.xlsm/.ods/.csv/.txt）")]
    UnsupportedFormat(String),

    #[error("文件读取失败: {0}")]
    FileReadError(String),

    #[error("Excel 解析失败: {0}")]
    ExcelParseError(String),

    #[error("CSV 解析失败: {0}")]
    CsvParseError(String),

    // ===== 表结构错误 =====
    #[error("无效表格: {0}")]
    InvalidTable(String),

    #[error("列映射冲突: 多个源列映射到 {canonical_name} ({sources})")]
    MappingCollision {
        canonical_name: String,
        sources: String,
    },

    // ===== 批次错误 =====
    #[error("批次 ID 冲突: {0}")]
    BatchIdCollision(String),

    #[error("批次不存在或不属于该商户: {0}")]
    BatchNotFound(String),

    // ===== 存储/配置错误 =====
    #[error("持久化失败: {0}")]
    Persistence(#[source] RepositoryError),

    #[error("配置读取失败 (key: {key}): {message}")]
    Config { key: String, message: String },
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FileReadError(err.to_string())
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CsvParseError(err.to_string())
    }
}

// 实现 From<calamine::Error>
impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::ExcelParseError(err.to_string())
    }
}

impl From<RepositoryError> for ImportError {
    fn from(err: RepositoryError) -> Self {
        ImportError::Persistence(err)
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;
