//! 运行阶段与计划的只读投影
//!
//! PlanSnapshot 只含拥有所有权的数据，供 UI / 日志 / 事件使用，永远不暴露 Plan 的可变引用。

use serde::{Deserialize, Serialize};

use crate::plan::{StepId, StepStatus};

/// 编排循环的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Planning,
    Executing,
    Recovering,
    Done,
}

/// 快照中的单个步骤
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepView {
    pub id: StepId,
    pub description: String,
    pub status: StepStatus,
}

/// 计划快照：有序步骤视图与进度
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub steps: Vec<StepView>,
    /// Completed 状态的步骤数
    pub completed: usize,
    pub total: usize,
    pub iteration: u32,
}

impl PlanSnapshot {
    /// 待办清单文本
    pub fn render(&self) -> String {
        let mut lines: Vec<String> = self
            .steps
            .iter()
            .map(|s| format!("{} {}. {}", s.status.marker(), s.id, s.description))
            .collect();
        lines.push(format!("Progress: {}/{} completed", self.completed, self.total));
        lines.join("\n")
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_todo_list() {
        let snap = PlanSnapshot {
            steps: vec![
                StepView {
                    id: 1,
                    description: "list files".into(),
                    status: StepStatus::Completed,
                },
                StepView {
                    id: 2,
                    description: "count lines".into(),
                    status: StepStatus::Pending,
                },
            ],
            completed: 1,
            total: 2,
            iteration: 1,
        };
        assert_eq!(
            snap.render(),
            "[x] 1. list files\n[ ] 2. count lines\nProgress: 1/2 completed"
        );
        assert_eq!(snap.count(StepStatus::Pending), 1);
    }
}
