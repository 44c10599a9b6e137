//! 步骤依赖图
//!
//! 使用邻接表和入度表（Kahn 拓扑排序）校验：id 合法且唯一、依赖均存在、无环。
//! 摄取与每次恢复变更都必须先通过这里，再提交到 Plan。

use std::collections::{BTreeMap, HashSet, VecDeque};

use crate::core::PlanValidationError;
use crate::plan::{Step, StepId};

/// 步骤依赖图
pub struct DependencyGraph {
    /// 邻接表：步骤 ID -> 依赖该步骤的步骤列表
    adjacency: BTreeMap<StepId, Vec<StepId>>,
    /// 入度表：步骤 ID -> 依赖数
    in_degree: BTreeMap<StepId, usize>,
}

impl DependencyGraph {
    /// 构建依赖图；id 非法、重复或依赖缺失时直接报错
    pub fn build(steps: &[Step]) -> Result<Self, PlanValidationError> {
        let mut seen = HashSet::new();
        for step in steps {
            if step.id == 0 {
                return Err(PlanValidationError::InvalidId(step.id));
            }
            if !seen.insert(step.id) {
                return Err(PlanValidationError::DuplicateId(step.id));
            }
        }

        let mut adjacency: BTreeMap<StepId, Vec<StepId>> = BTreeMap::new();
        let mut in_degree: BTreeMap<StepId, usize> = BTreeMap::new();
        for step in steps {
            adjacency.entry(step.id).or_default();
            in_degree.insert(step.id, step.dependencies.len());
        }

        for step in steps {
            for dep in &step.dependencies {
                if !seen.contains(dep) {
                    return Err(PlanValidationError::UnknownDependency {
                        step: step.id,
                        dependency: *dep,
                    });
                }
                adjacency.entry(*dep).or_default().push(step.id);
            }
        }

        Ok(Self {
            adjacency,
            in_degree,
        })
    }

    /// 拓扑序；存在环时返回环上（或被环阻塞的）最小步骤 ID
    pub fn topological_order(&self) -> Result<Vec<StepId>, PlanValidationError> {
        let mut in_degree = self.in_degree.clone();
        let mut queue: VecDeque<StepId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(in_degree.len());

        while let Some(id) = queue.pop_front() {
            order.push(id);
            for dependent in self.adjacency.get(&id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*dependent);
                    }
                }
            }
        }

        if order.len() == in_degree.len() {
            return Ok(order);
        }
        let stuck = in_degree
            .iter()
            .find(|(_, degree)| **degree > 0)
            .map(|(id, _)| *id)
            .unwrap_or_default();
        Err(PlanValidationError::CycleDetected(stuck))
    }
}

/// 校验一组步骤可以组成合法计划
pub fn validate_steps(steps: &[Step]) -> Result<(), PlanValidationError> {
    if steps.is_empty() {
        return Err(PlanValidationError::Empty);
    }
    DependencyGraph::build(steps)?.topological_order()?;
    Ok(())
}
