// ==========================================
// 结算数据仓库 - 数据源错误类型
// ==========================================
// 工具: thiserror 派生宏
// ==========================================

use thiserror::Error;

/// 数据源错误类型
#[derive(Error, Debug)]
pub enum SourceError {
    // ===== 文件相关错误 =====
    #[error("导出文件读取失败 ({path}): {message}")]
    FileReadError { path: String, message: String },

    #[error("JSON 解析失败 ({file} 第 {line} 行): {message}")]
    JsonParseError {
        file: String,
        line: usize,
        message: String,
    },

    #[error("CSV 解析失败 ({file} 第 {line} 行): {message}")]
    CsvParseError {
        file: String,
        line: usize,
        message: String,
    },

    // ===== 数据映射错误 =====
    #[error("字段缺失 ({file} 第 {line} 行): {field}")]
    MissingField {
        file: String,
        line: usize,
        field: String,
    },

    #[error("字段值错误 ({file} 第 {line} 行, 字段 {field}): {message}")]
    FieldValueError {
        file: String,
        line: usize,
        field: String,
        message: String,
    },

    // ===== 调用错误 =====
    #[error("记录类型与数据源不匹配: {0}")]
    RecordKindMismatch(String),

    #[error("数据源内部错误: {0}")]
    Internal(String),
}

/// Result 类型别名
pub type SourceResult<T> = Result<T, SourceError>;
