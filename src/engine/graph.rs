// ==========================================
// 结算数据仓库 - 任务依赖图
// ==========================================
// 红线: 构建时拒绝环；边只能指向已登记的节点
// 输出: 分波次的拓扑序（同一波内互不依赖，可并发）
// ==========================================

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

use crate::engine::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone)]
pub struct TaskGraph<K: Ord + Copy + Debug> {
    // 节点 → 直接上游
    upstream: BTreeMap<K, BTreeSet<K>>,
}

impl<K: Ord + Copy + Debug> TaskGraph<K> {
    /// 由节点与 (上游, 下游) 边构建
    pub fn new(
        nodes: impl IntoIterator<Item = K>,
        edges: impl IntoIterator<Item = (K, K)>,
    ) -> PipelineResult<Self> {
        let mut upstream: BTreeMap<K, BTreeSet<K>> =
            nodes.into_iter().map(|k| (k, BTreeSet::new())).collect();

        for (from, to) in edges {
            if !upstream.contains_key(&from) {
                return Err(PipelineError::Graph(format!("未知上游任务: {:?}", from)));
            }
            match upstream.get_mut(&to) {
                Some(deps) => {
                    deps.insert(from);
                }
                None => return Err(PipelineError::Graph(format!("未知任务: {:?}", to))),
            }
        }

        let graph = Self { upstream };
        graph.waves_of(&graph.nodes())?;
        Ok(graph)
    }

    pub fn nodes(&self) -> BTreeSet<K> {
        self.upstream.keys().copied().collect()
    }

    pub fn contains(&self, node: &K) -> bool {
        self.upstream.contains_key(node)
    }

    pub fn upstream(&self, node: &K) -> BTreeSet<K> {
        self.upstream.get(node).cloned().unwrap_or_default()
    }

    /// 全部祖先（不含自身）
    pub fn ancestors(&self, node: &K) -> BTreeSet<K> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<K> = self.upstream(node).into_iter().collect();
        while let Some(k) = stack.pop() {
            if seen.insert(k) {
                stack.extend(self.upstream(&k));
            }
        }
        seen
    }

    /// 子集内的分波拓扑序；子集外的上游视为已满足
    pub fn waves_of(&self, subset: &BTreeSet<K>) -> PipelineResult<Vec<Vec<K>>> {
        let mut pending: BTreeMap<K, BTreeSet<K>> = subset
            .iter()
            .map(|k| {
                let deps = self
                    .upstream(k)
                    .into_iter()
                    .filter(|d| subset.contains(d))
                    .collect();
                (*k, deps)
            })
            .collect();

        let mut waves = Vec::new();
        while !pending.is_empty() {
            let ready: Vec<K> = pending
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(k, _)| *k)
                .collect();
            if ready.is_empty() {
                let stuck: Vec<K> = pending.keys().copied().collect();
                return Err(PipelineError::Graph(format!("任务依赖存在环: {:?}", stuck)));
            }
            for k in &ready {
                pending.remove(k);
            }
            for deps in pending.values_mut() {
                for k in &ready {
                    deps.remove(k);
                }
            }
            waves.push(ready);
        }
        Ok(waves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::task::TaskId;

    #[test]
    fn test_cycle_is_rejected() {
        let err = TaskGraph::new([1, 2, 3], [(1, 2), (2, 3), (3, 1)]).unwrap_err();
        assert!(matches!(err, PipelineError::Graph(_)));
    }

    #[test]
    fn test_unknown_edge_is_rejected() {
        assert!(TaskGraph::new([1, 2], [(1, 9)]).is_err());
    }

    #[test]
    fn test_waves_follow_dependencies() {
        let graph = TaskGraph::new(
            TaskId::ALL,
            TaskId::ALL
                .iter()
                .flat_map(|t| t.dependencies().into_iter().map(move |d| (d, *t))),
        )
        .unwrap();

        let dds: BTreeSet<TaskId> = TaskId::ALL
            .iter()
            .copied()
            .filter(|t| t.layer() == crate::domain::types::Layer::Dds)
            .collect();
        let waves = graph.waves_of(&dds).unwrap();
        let position = |t: TaskId| waves.iter().position(|w| w.contains(&t)).unwrap();

        assert!(position(TaskId::DmRestaurants) < position(TaskId::DmProducts));
        assert!(position(TaskId::DmOrders) < position(TaskId::FctProductSales));
        assert!(position(TaskId::DmCouriers) < position(TaskId::FctDeliveries));
        assert_eq!(position(TaskId::DmUsers), 0);

        let ancestors = graph.ancestors(&TaskId::FctDeliveries);
        assert!(ancestors.contains(&TaskId::StgDeliverysystemDeliveries));
        assert!(ancestors.contains(&TaskId::DmUsers));
        assert!(!ancestors.contains(&TaskId::DmProducts));
    }
}
