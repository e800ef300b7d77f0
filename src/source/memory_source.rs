// ==========================================
// 结算数据仓库 - 内存数据源
// ==========================================
// 用途: 测试与嵌入场景；同一源系统标识重复写入视为源端更新
// ==========================================

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::staging::{StagedRecord, StagingSource};
use crate::domain::workflow::WorkflowCursor;
use crate::source::error::{SourceError, SourceResult};
use crate::source::reader::{kind_matches, select_after, SourceReader};

#[derive(Default)]
pub struct MemorySource {
    records: RwLock<HashMap<StagingSource, Vec<StagedRecord>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入（或替换同标识的）源记录
    pub fn push(&self, source: StagingSource, record: StagedRecord) -> SourceResult<()> {
        if !kind_matches(source, &record) {
            return Err(SourceError::RecordKindMismatch(format!(
                "{} 不接受 {:?}",
                source.table(),
                record
            )));
        }
        let mut guard = self
            .records
            .write()
            .map_err(|e| SourceError::Internal(e.to_string()))?;
        let list = guard.entry(source).or_default();
        let record = record.normalized();
        let identifier = record.identifier();
        match list.iter_mut().find(|r| r.identifier() == identifier) {
            Some(existing) => *existing = record,
            None => list.push(record),
        }
        Ok(())
    }

    /// 清空某个源
    pub fn clear(&self, source: StagingSource) -> SourceResult<()> {
        let mut guard = self
            .records
            .write()
            .map_err(|e| SourceError::Internal(e.to_string()))?;
        guard.remove(&source);
        Ok(())
    }

    pub fn len(&self, source: StagingSource) -> usize {
        self.records
            .read()
            .map(|g| g.get(&source).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn read_after(
        &self,
        source: StagingSource,
        after: &WorkflowCursor,
        limit: usize,
    ) -> SourceResult<Vec<StagedRecord>> {
        let snapshot = {
            let guard = self
                .records
                .read()
                .map_err(|e| SourceError::Internal(e.to_string()))?;
            guard.get(&source).cloned().unwrap_or_default()
        };
        Ok(select_after(snapshot, after, limit))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::staging::{StgDocument, StgNamedObject};
    use crate::domain::types::parse_ts;

    fn doc(id: &str, ts: &str) -> StagedRecord {
        StagedRecord::Document(StgDocument {
            object_id: id.into(),
            object_value: "{}".into(),
            update_ts: parse_ts(ts).unwrap(),
        })
    }

    #[tokio::test]
    async fn test_read_after_sorts_and_limits() {
        let src = MemorySource::new();
        src.push(StagingSource::OrdersystemOrders, doc("B", "2024-06-01 10:00:00")).unwrap();
        src.push(StagingSource::OrdersystemOrders, doc("A", "2024-06-01 10:00:00")).unwrap();
        src.push(StagingSource::OrdersystemOrders, doc("C", "2024-05-01 10:00:00")).unwrap();

        let first = src
            .read_after(StagingSource::OrdersystemOrders, &WorkflowCursor::empty(), 2)
            .await
            .unwrap();
        let ids: Vec<_> = first.iter().map(|r| r.identifier()).collect();
        assert_eq!(ids, vec!["C", "A"]);

        let rest = src
            .read_after(StagingSource::OrdersystemOrders, &first[1].position(), 10)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].identifier(), "B");
    }

    #[test]
    fn test_push_replaces_same_identifier_and_checks_kind() {
        let src = MemorySource::new();
        src.push(StagingSource::OrdersystemUsers, doc("U1", "2024-01-01 00:00:00")).unwrap();
        src.push(StagingSource::OrdersystemUsers, doc("U1", "2024-01-02 00:00:00")).unwrap();
        assert_eq!(src.len(StagingSource::OrdersystemUsers), 1);

        let err = src
            .push(
                StagingSource::OrdersystemUsers,
                StagedRecord::Named(StgNamedObject {
                    object_id: "x".into(),
                    name: "y".into(),
                }),
            )
            .unwrap_err();
        assert!(matches!(err, SourceError::RecordKindMismatch(_)));
    }
}
