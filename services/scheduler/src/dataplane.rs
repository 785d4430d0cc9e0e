//! Network dataplane refresh.

use async_trait::async_trait;
use berth_db::Container;
use tokio::sync::Mutex;
use tracing::debug;

/// Errors from the dataplane.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DataplaneError {
    #[error("dataplane refresh failed: {0}")]
    Refresh(String),
}

/// Programs the local network for the containers running on this worker.
#[async_trait]
pub trait Dataplane: Send + Sync {
    /// Replace all flows with ones for `containers`.
    async fn replace_flows(&self, containers: &[Container]) -> Result<(), DataplaneError>;
}

/// Dataplane that records the last set of containers it was given.
#[derive(Default)]
pub struct RecordingDataplane {
    state: Mutex<Recorded>,
}

#[derive(Default)]
struct Recorded {
    last: Option<Vec<Container>>,
    calls: usize,
}

impl RecordingDataplane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Containers from the most recent refresh.
    pub async fn last(&self) -> Option<Vec<Container>> {
        self.state.lock().await.last.clone()
    }

    /// Number of refreshes.
    pub async fn calls(&self) -> usize {
        self.state.lock().await.calls
    }
}

#[async_trait]
impl Dataplane for RecordingDataplane {
    async fn replace_flows(&self, containers: &[Container]) -> Result<(), DataplaneError> {
        debug!(containers = containers.len(), "Replacing flows");
        let mut state = self.state.lock().await;
        state.last = Some(containers.to_vec());
        state.calls += 1;
        Ok(())
    }
}
