// ==========================================
// 结算数据仓库 - 数据源层
// ==========================================
// 职责: 读取三个源系统（订单/配送/积分）的导出，供抽取阶段落地 stg
// 支持: 导出目录 (JSONL + CSV) / 内存
// ==========================================

pub mod error;
pub mod file_source;
pub mod memory_source;
pub mod reader;

pub use error::{SourceError, SourceResult};
pub use file_source::FileSource;
pub use memory_source::MemorySource;
pub use reader::SourceReader;
