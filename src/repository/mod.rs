// ==========================================
// 结算数据仓库 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// 事务: 仓储借用调用方的连接/事务，由 Warehouse 统一开启与提交
// ==========================================

pub mod dimension_repo;
pub mod error;
pub mod fact_repo;
pub mod integrity_repo;
pub mod mart_repo;
pub mod scd_repo;
pub mod staging_repo;
pub mod warehouse;
pub mod wf_settings_repo;

// 重导出核心仓储
pub use dimension_repo::{DimensionRepository, DimensionTable};
pub use error::{RepositoryError, RepositoryResult};
pub use fact_repo::FactRepository;
pub use integrity_repo::{FkOrphan, IntegrityRepository};
pub use mart_repo::{LedgerDeliveryLine, MartRepository, SettlementAggregate};
pub use scd_repo::{ScdRepository, ScdTable};
pub use staging_repo::{StagingRepository, StgRow};
pub use warehouse::Warehouse;
pub use wf_settings_repo::WorkflowSettingsRepository;
