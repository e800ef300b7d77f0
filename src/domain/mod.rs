// ==========================================
// 结算数据仓库 - 领域模型层
// ==========================================
// 职责: 定义各层表的行结构、工作流游标、分层枚举
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod dimension;
pub mod fact;
pub mod mart;
pub mod payload;
pub mod staging;
pub mod types;
pub mod workflow;

// 重导出核心类型
pub use dimension::{
    DmCourier, DmOrder, DmProduct, DmRestaurant, DmTimestamp, DmUser, ProductAttrs,
    RestaurantAttrs, ScdVersion,
};
pub use fact::{FctDelivery, FctProductSale};
pub use mart::{CourierLedgerRow, SettlementReportRow};
pub use staging::{
    BonusEvent, BonusRank, StagedRecord, StagingSource, StgDelivery, StgDocument, StgNamedObject,
};
pub use types::Layer;
pub use workflow::{workflow_keys, WorkflowCursor, WorkflowSetting};
