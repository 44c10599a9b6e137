//! 会话监管：运行级取消
//!
//! 持有根 CancellationToken；Ctrl+C 或宿主调用 cancel 时触发。编排循环在每轮迭代边界检查它，
//! 能力调用拿到子 token，只用于如实感知取消，调度器从不因此中途丢弃调用。

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 创建子 token（用于单次运行或单次调用）
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// 在后台监听 Ctrl+C 并触发取消
    pub fn cancel_on_ctrl_c(&self) {
        let token = self.cancel_token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received, cancelling run");
                token.cancel();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_propagates_to_children() {
        let sup = SessionSupervisor::new();
        let child = sup.child_token();
        assert!(!child.is_cancelled());
        sup.cancel();
        assert!(sup.is_cancelled());
        assert!(child.is_cancelled());
    }
}
