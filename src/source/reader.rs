// ==========================================
// 结算数据仓库 - 数据源接口
// ==========================================
// 职责: 定义抽取阶段读取源系统导出的统一接口
// ==========================================

use async_trait::async_trait;

use crate::domain::staging::{StagedRecord, StagingSource};
use crate::domain::workflow::WorkflowCursor;
use crate::source::error::SourceResult;

// ==========================================
// SourceReader Trait
// ==========================================
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// 读取游标之后的记录
    ///
    /// # 参数
    /// - `source`: 贴源表
    /// - `after`: 工作流游标（只返回位置严格大于它的记录）
    /// - `limit`: 本批最多条数
    ///
    /// # 返回
    /// - 按位置升序排列的记录
    async fn read_after(
        &self,
        source: StagingSource,
        after: &WorkflowCursor,
        limit: usize,
    ) -> SourceResult<Vec<StagedRecord>>;

    /// 数据源描述（日志用）
    fn describe(&self) -> String;
}

/// 记录形状是否与贴源表匹配
pub fn kind_matches(source: StagingSource, record: &StagedRecord) -> bool {
    use StagingSource::*;
    matches!(
        (source, record),
        (OrdersystemRestaurants | OrdersystemUsers | OrdersystemOrders, StagedRecord::Document(_))
            | (DeliverysystemRestaurants | DeliverysystemCouriers, StagedRecord::Named(_))
            | (DeliverysystemDeliveries, StagedRecord::Delivery(_))
            | (BonussystemRanks, StagedRecord::Rank(_))
            | (BonussystemEvents, StagedRecord::Event(_))
    )
}

/// 过滤游标之后的记录、按位置排序并截断
pub fn select_after(
    records: impl IntoIterator<Item = StagedRecord>,
    after: &WorkflowCursor,
    limit: usize,
) -> Vec<StagedRecord> {
    let mut selected: Vec<(WorkflowCursor, StagedRecord)> = records
        .into_iter()
        .map(|r| (r.position(), r))
        .filter(|(pos, _)| after.admits(pos))
        .collect();
    selected.sort_by(|a, b| a.0.cmp(&b.0));
    selected.truncate(limit);
    selected.into_iter().map(|(_, r)| r).collect()
}
