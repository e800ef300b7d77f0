// ==========================================
// 结算数据仓库 - 缓慢变化维度判定
// ==========================================
// 规则 (按顺序):
//   无当前版本            → 打开 [ts, 哨兵)
//   属性未变              → 不动
//   ts <  当前.active_from → 过期重放，忽略并告警
//   ts == 当前.active_from → 原地修正当前版本
//   ts >  当前.active_from → 在 ts 关闭当前版本并打开新版本
// 红线: 同一业务键区间不重叠，且只有一个开放版本
// ==========================================

use chrono::NaiveDateTime;

use crate::domain::dimension::ScdVersion;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScdAction {
    Open,
    Unchanged,
    CloseAndOpen { close_id: i64 },
    Supersede { id: i64 },
    Stale { current_from: NaiveDateTime },
}

/// 判定一次属性观测对版本链的影响
pub fn decide<A: PartialEq>(
    current: Option<&ScdVersion<A>>,
    observed: &A,
    effective: &NaiveDateTime,
) -> ScdAction {
    let Some(current) = current else {
        return ScdAction::Open;
    };
    if current.attrs == *observed {
        return ScdAction::Unchanged;
    }
    if *effective < current.active_from {
        ScdAction::Stale {
            current_from: current.active_from,
        }
    } else if *effective == current.active_from {
        ScdAction::Supersede { id: current.id }
    } else {
        ScdAction::CloseAndOpen {
            close_id: current.id,
        }
    }
}
