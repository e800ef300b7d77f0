// ==========================================
// 结算数据仓库 - 导出文件数据源
// ==========================================
// 支持: JSONL (订单/配送子系统) / CSV (积分子系统)
// 约定: 文件缺失视为空数据源；任一行解析失败则整批失败（不写入任何数据）
// ==========================================

use async_trait::async_trait;
use csv::ReaderBuilder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::domain::staging::{
    BonusEvent, BonusRank, StagedRecord, StagingSource, StgDelivery, StgDocument, StgNamedObject,
};
use crate::domain::types::parse_ts;
use crate::domain::workflow::WorkflowCursor;
use crate::source::error::{SourceError, SourceResult};
use crate::source::reader::{select_after, SourceReader};

// ==========================================
// FileSource
// ==========================================
pub struct FileSource {
    dir: PathBuf,
}

impl FileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 读取并解析某个贴源表的完整导出
    pub async fn load_all(&self, source: StagingSource) -> SourceResult<Vec<StagedRecord>> {
        let path = self.dir.join(source.export_file());
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "导出文件不存在，视为空数据源");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(SourceError::FileReadError {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })
            }
        };
        parse_export(source, &text)
    }
}

#[async_trait]
impl SourceReader for FileSource {
    async fn read_after(
        &self,
        source: StagingSource,
        after: &WorkflowCursor,
        limit: usize,
    ) -> SourceResult<Vec<StagedRecord>> {
        let all = self.load_all(source).await?;
        Ok(select_after(all, after, limit))
    }

    fn describe(&self) -> String {
        format!("file:{}", self.dir.display())
    }
}

// ==========================================
// 解析
// ==========================================

/// 按贴源表解析导出文本
pub fn parse_export(source: StagingSource, text: &str) -> SourceResult<Vec<StagedRecord>> {
    let file = source.export_file();
    match source {
        StagingSource::OrdersystemRestaurants
        | StagingSource::OrdersystemUsers
        | StagingSource::OrdersystemOrders => parse_jsonl(file, text, parse_document),
        StagingSource::DeliverysystemRestaurants | StagingSource::DeliverysystemCouriers => {
            parse_jsonl(file, text, parse_named)
        }
        StagingSource::DeliverysystemDeliveries => parse_jsonl(file, text, parse_delivery),
        StagingSource::BonussystemRanks => parse_ranks(file, text),
        StagingSource::BonussystemEvents => parse_events(file, text),
    }
}

type LineParser = fn(&str, usize, &str, &JsonValue) -> SourceResult<StagedRecord>;

fn parse_jsonl(file: &str, text: &str, parse_line: LineParser) -> SourceResult<Vec<StagedRecord>> {
    let mut records = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        // 跳过空行
        if line.is_empty() {
            continue;
        }
        let value: JsonValue = serde_json::from_str(line).map_err(|e| SourceError::JsonParseError {
            file: file.to_string(),
            line: line_no,
            message: e.to_string(),
        })?;
        records.push(parse_line(file, line_no, line, &value)?);
    }
    Ok(records)
}

fn str_field(file: &str, line: usize, value: &JsonValue, field: &str) -> SourceResult<String> {
    match value.get(field) {
        Some(JsonValue::String(s)) => Ok(s.clone()),
        Some(JsonValue::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(SourceError::FieldValueError {
            file: file.to_string(),
            line,
            field: field.to_string(),
            message: "期望字符串".to_string(),
        }),
        None => Err(SourceError::MissingField {
            file: file.to_string(),
            line,
            field: field.to_string(),
        }),
    }
}

fn ts_field(file: &str, line: usize, value: &JsonValue, field: &str) -> SourceResult<chrono::NaiveDateTime> {
    let text = str_field(file, line, value, field)?;
    parse_ts(&text).ok_or_else(|| SourceError::FieldValueError {
        file: file.to_string(),
        line,
        field: field.to_string(),
        message: format!("无效时间戳: {}", text),
    })
}

fn parse_document(file: &str, line: usize, raw: &str, value: &JsonValue) -> SourceResult<StagedRecord> {
    Ok(StagedRecord::Document(StgDocument {
        object_id: str_field(file, line, value, "_id")?,
        object_value: raw.to_string(),
        update_ts: ts_field(file, line, value, "update_ts")?,
    }))
}

fn parse_named(file: &str, line: usize, _raw: &str, value: &JsonValue) -> SourceResult<StagedRecord> {
    Ok(StagedRecord::Named(StgNamedObject {
        object_id: str_field(file, line, value, "_id")?,
        name: str_field(file, line, value, "name")?,
    }))
}

fn parse_delivery(file: &str, line: usize, raw: &str, value: &JsonValue) -> SourceResult<StagedRecord> {
    Ok(StagedRecord::Delivery(StgDelivery {
        delivery_id: str_field(file, line, value, "delivery_id")?,
        delivery_ts: ts_field(file, line, value, "delivery_ts")?,
        delivery_value: raw.to_string(),
    }))
}

#[derive(Debug, Deserialize)]
struct RankCsvRow {
    id: i64,
    name: String,
    bonus_percent: f64,
    min_payment_threshold: f64,
}

#[derive(Debug, Deserialize)]
struct EventCsvRow {
    id: i64,
    event_ts: String,
    event_type: String,
    event_value: String,
}

fn csv_rows<T: DeserializeOwned>(file: &str, text: &str) -> SourceResult<Vec<(usize, T)>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    let mut iter = reader.deserialize::<T>();
    while let Some(result) = iter.next() {
        let row = result.map_err(|e| SourceError::CsvParseError {
            file: file.to_string(),
            line: e.position().map(|p| p.line() as usize).unwrap_or(0),
            message: e.to_string(),
        })?;
        let line = iter.reader().position().line() as usize;
        rows.push((line, row));
    }
    Ok(rows)
}

fn parse_ranks(file: &str, text: &str) -> SourceResult<Vec<StagedRecord>> {
    Ok(csv_rows::<RankCsvRow>(file, text)?
        .into_iter()
        .map(|(_, r)| {
            StagedRecord::Rank(BonusRank {
                id: r.id,
                name: r.name,
                bonus_percent: r.bonus_percent,
                min_payment_threshold: r.min_payment_threshold,
            })
        })
        .collect())
}

fn parse_events(file: &str, text: &str) -> SourceResult<Vec<StagedRecord>> {
    csv_rows::<EventCsvRow>(file, text)?
        .into_iter()
        .map(|(line, r)| {
            let event_ts = parse_ts(&r.event_ts).ok_or_else(|| SourceError::FieldValueError {
                file: file.to_string(),
                line,
                field: "event_ts".to_string(),
                message: format!("无效时间戳: {}", r.event_ts),
            })?;
            Ok(StagedRecord::Event(BonusEvent {
                id: r.id,
                event_ts,
                event_type: r.event_type,
                event_value: r.event_value,
            }))
        })
        .collect()
}
