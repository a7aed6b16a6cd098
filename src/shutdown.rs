use tokio_util::sync::CancellationToken;

/// Coordinates graceful shutdown across the server's background tasks.
///
/// Cloning shares the underlying token; any clone can trigger shutdown and
/// all clones observe it.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Signal shutdown to all observers.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when shutdown has been triggered.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_is_observed_by_clones() {
        let coord = ShutdownCoordinator::new();
        let clone = coord.clone();
        assert!(!clone.is_triggered());

        coord.trigger();
        assert!(clone.is_triggered());
        clone.wait().await; // must not hang
    }

    #[tokio::test]
    async fn trigger_is_idempotent() {
        let coord = ShutdownCoordinator::new();
        coord.trigger();
        coord.trigger();
        assert!(coord.is_triggered());
    }
}
