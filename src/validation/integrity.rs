// ==========================================
// 结算数据仓库 - 仓库完整性检查
// ==========================================
// 检查项:
// - SCD 版本区间重叠 / 反向区间 / 多个开放版本
// - dds 外键孤儿行
// - 抽取检查点偏离
// ==========================================

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::domain::types::{format_ts, scd_open_end};
use crate::engine::error::PipelineResult;
use crate::engine::orchestrator::find_checkpoint_divergences;
use crate::repository::{FkOrphan, IntegrityRepository, ScdRepository, ScdTable, Warehouse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowProblem {
    Overlap,
    Inverted,
    MultipleOpen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScdWindowViolation {
    pub table: &'static str,
    pub natural_key: String,
    pub version_ids: Vec<i64>,
    pub problem: WindowProblem,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    pub scd_violations: Vec<ScdWindowViolation>,
    pub fk_orphans: Vec<FkOrphan>,
    pub checkpoint_divergences: Vec<String>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.scd_violations.is_empty() && self.fk_orphans.is_empty() && self.checkpoint_divergences.is_empty()
    }

    pub fn violation_count(&self) -> usize {
        self.scd_violations.len() + self.fk_orphans.len() + self.checkpoint_divergences.len()
    }
}

type Window = (String, i64, NaiveDateTime, NaiveDateTime);

/// 按业务键检查版本区间（输入按业务键、active_from 排序）
pub fn check_windows(table: ScdTable, windows: &[Window]) -> Vec<ScdWindowViolation> {
    let mut out = Vec::new();
    let open_end = scd_open_end();

    for group in windows.chunk_by(|a, b| a.0 == b.0) {
        let key = &group[0].0;
        let violation = |ids: Vec<i64>, problem| ScdWindowViolation {
            table: table.name(),
            natural_key: key.clone(),
            version_ids: ids,
            problem,
        };

        for (_, id, from, to) in group {
            if from >= to {
                out.push(violation(vec![*id], WindowProblem::Inverted));
            }
        }
        for pair in group.windows(2) {
            let (_, prev_id, _, prev_to) = &pair[0];
            let (_, next_id, next_from, _) = &pair[1];
            if next_from < prev_to {
                out.push(violation(vec![*prev_id, *next_id], WindowProblem::Overlap));
            }
        }
        let open: Vec<i64> = group
            .iter()
            .filter(|(_, _, _, to)| *to >= open_end)
            .map(|(_, id, _, _)| *id)
            .collect();
        if open.len() > 1 {
            out.push(violation(open, WindowProblem::MultipleOpen));
        }
    }
    out
}

pub struct IntegrityChecker {
    warehouse: Warehouse,
}

impl IntegrityChecker {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    pub fn run(&self) -> PipelineResult<IntegrityReport> {
        let mut report = IntegrityReport::default();

        self.warehouse.read(|conn| {
            let scd = ScdRepository::new(conn);
            for table in [ScdTable::Restaurants, ScdTable::Products] {
                let windows = scd.all_windows(table)?;
                report.scd_violations.extend(check_windows(table, &windows));
            }
            report.fk_orphans = IntegrityRepository::new(conn).foreign_key_orphans("dds")?;
            Ok::<_, crate::engine::error::PipelineError>(())
        })?;

        report.checkpoint_divergences = find_checkpoint_divergences(&self.warehouse)?
            .into_iter()
            .map(|e| e.to_string())
            .collect();

        for v in &report.scd_violations {
            tracing::warn!(table = v.table, natural_key = %v.natural_key, problem = ?v.problem, ids = ?v.version_ids, "SCD 区间异常");
        }
        for o in &report.fk_orphans {
            tracing::warn!(table = %o.table, rowid = ?o.rowid, parent = %o.parent, "外键孤儿行");
        }
        tracing::info!(violations = report.violation_count(), "完整性检查完成");
        Ok(report)
    }
}

/// 便于展示的区间文本
pub fn describe_window(from: &NaiveDateTime, to: &NaiveDateTime) -> String {
    format!("[{}, {})", format_ts(from), format_ts(to))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::parse_ts;

    fn w(key: &str, id: i64, from: &str, to: &str) -> Window {
        (key.into(), id, parse_ts(from).unwrap(), parse_ts(to).unwrap())
    }

    #[test]
    fn test_clean_chain() {
        let windows = vec![
            w("R1", 1, "2024-01-01 00:00:00", "2024-06-01 00:00:00"),
            w("R1", 2, "2024-06-01 00:00:00", "2500-01-01 00:00:00"),
            w("R2", 3, "2024-02-01 00:00:00", "2500-01-01 00:00:00"),
        ];
        assert!(check_windows(ScdTable::Restaurants, &windows).is_empty());
    }

    #[test]
    fn test_overlap_and_inverted() {
        let windows = vec![
            w("R1", 1, "2024-01-01 00:00:00", "2024-07-01 00:00:00"),
            w("R1", 2, "2024-06-01 00:00:00", "2024-05-01 00:00:00"),
        ];
        let problems: Vec<_> = check_windows(ScdTable::Restaurants, &windows)
            .into_iter()
            .map(|v| v.problem)
            .collect();
        assert!(problems.contains(&WindowProblem::Overlap));
        assert!(problems.contains(&WindowProblem::Inverted));
    }

    #[test]
    fn test_describe_window() {
        let from = parse_ts("2024-01-01 00:00:00").unwrap();
        assert_eq!(
            describe_window(&from, &scd_open_end()),
            "[2024-01-01 00:00:00, 2500-01-01 00:00:00)"
        );
    }
}
