// ==========================================
// 结算数据仓库 - 校验层
// ==========================================
// check_rules: 写入前的取值规则（对齐表上的 CHECK 约束）
// integrity:   仓库级完整性巡检（SCD 区间 / 外键 / 检查点）
// ==========================================

pub mod check_rules;
pub mod integrity;

pub use check_rules::{ensure_clean, CheckViolation};
pub use integrity::{IntegrityChecker, IntegrityReport, ScdWindowViolation, WindowProblem};
