// ==========================================
// 卡支付结算对账 - 导入管道
// ==========================================
// 阶段: 文件解析 → 表头检测 → 列映射 → 标准化 → 分类
// 红线: 各阶段为纯计算，存储访问只在 engine 层
// ==========================================

pub mod classifier;
pub mod error;
pub mod file_parser;
pub mod header_detector;
pub mod importer_trait;
pub mod normalizer;
pub mod schema_mapper;

pub use classifier::BrandTermClassifier;
pub use error::{ImportError, ImportResult};
pub use file_parser::{CsvParser, ExcelParser, UniversalFileParser};
pub use header_detector::{FilledCountHeaderDetector, DEFAULT_MIN_FILLED};
pub use importer_trait::{Classifier, FileParser, HeaderDetector, Normalizer, SchemaMapper};
pub use normalizer::{FieldNormalizer, DEFAULT_DATE_FORMAT, UNKNOWN_OPERATOR};
pub use schema_mapper::ContextSchemaMapper;
