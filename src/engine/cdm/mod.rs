// ==========================================
// 结算数据仓库 - 集市层 (cdm) 汇总
// ==========================================
// 红线: 汇总键 upsert 可重算；负值汇总视为致命数据质量错误
// ==========================================

pub mod courier_ledger;
pub mod settlement_report;

pub use courier_ledger::{ledger_row, reward_tier, CourierLedgerBuilder};
pub use settlement_report::{settlement_row, SettlementReportBuilder};
