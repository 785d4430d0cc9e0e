//! Container runtime interface and mock implementation.
//!
//! The runtime interface abstracts the local container engine:
//! - Listing containers by label
//! - Running a container from evaluated options
//! - Removing a container by id
//!
//! A mock implementation is provided for testing and development.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use berth_db::VolumeMount;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Label marking containers owned by the scheduler.
pub const MANAGED_LABEL: &str = "berth.managed";

/// Label carrying the digest of a container's mounted files.
pub const FILES_LABEL: &str = "berth.files";

/// Errors from the container runtime.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    #[error("container not found: {id}")]
    NotFound { id: String },

    #[error("runtime request failed: {0}")]
    Request(String),
}

/// A container as reported by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActualContainer {
    pub id: String,
    pub name: String,
    pub ip: String,
    pub image: String,
    pub image_id: String,

    /// Executable the runtime started. When an image has no entrypoint the
    /// runtime moves the first argument here.
    pub path: String,
    pub args: Vec<String>,

    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub endpoint_id: String,
    pub status: String,
    pub created: DateTime<Utc>,
}

/// Everything needed to start a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub name: String,
    pub hostname: String,
    pub image: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub filepath_to_content: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub ip: String,
    pub privileged: bool,
    pub volume_mounts: Vec<VolumeMount>,
}

/// Container runtime interface.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List containers carrying every label in `labels`.
    async fn list(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ActualContainer>, RuntimeError>;

    /// Start a container and return its id.
    async fn run(&self, options: RunOptions) -> Result<String, RuntimeError>;

    /// Remove a container.
    async fn remove(&self, id: &str) -> Result<(), RuntimeError>;
}

/// Mock runtime for testing and development.
pub struct MockRuntime {
    containers: Mutex<BTreeMap<String, ActualContainer>>,
    images: std::sync::Mutex<HashMap<String, String>>,
    id_counter: AtomicU64,
    runs: AtomicUsize,
    removes: AtomicUsize,

    /// Whether runs and removes should fail.
    fail_requests: bool,
}

impl MockRuntime {
    /// Create a new mock runtime.
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(BTreeMap::new()),
            images: std::sync::Mutex::new(HashMap::new()),
            id_counter: AtomicU64::new(0),
            runs: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
            fail_requests: false,
        }
    }

    /// Create a mock runtime that fails every run and remove.
    pub fn failing() -> Self {
        Self {
            fail_requests: true,
            ..Self::new()
        }
    }

    /// Resolve `name` to `id` when it is pulled. Images referenced by
    /// digest resolve to themselves, other unknown images to `mock:<name>`.
    pub fn with_image(self, name: &str, id: &str) -> Self {
        self.images
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(name.to_string(), id.to_string());
        self
    }

    /// Add a container as if something else had started it.
    pub async fn insert(&self, container: ActualContainer) {
        self.containers
            .lock()
            .await
            .insert(container.id.clone(), container);
    }

    /// Snapshot of every container, in id order.
    pub async fn containers(&self) -> Vec<ActualContainer> {
        self.containers.lock().await.values().cloned().collect()
    }

    /// Number of run calls, including failed ones.
    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Number of remove calls, including failed ones.
    pub fn remove_count(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> String {
        let counter = self.id_counter.fetch_add(1, Ordering::SeqCst);
        format!("mock_{:016x}", counter)
    }

    fn image_id(&self, image: &str) -> String {
        self.images
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(image)
            .cloned()
            .unwrap_or_else(|| {
                if image.starts_with("sha256:") {
                    image.to_string()
                } else {
                    format!("mock:{image}")
                }
            })
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ActualContainer>, RuntimeError> {
        let containers = self.containers.lock().await;
        Ok(containers
            .values()
            .filter(|c| labels.iter().all(|(k, v)| c.labels.get(k) == Some(v)))
            .cloned()
            .collect())
    }

    async fn run(&self, options: RunOptions) -> Result<String, RuntimeError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail_requests {
            return Err(RuntimeError::Request(
                "mock runtime configured to fail".to_string(),
            ));
        }

        info!(
            name = %options.name,
            image = %options.image,
            ip = %options.ip,
            "[MOCK] Running container"
        );

        // Images carry no entrypoint, so the first argument becomes the path.
        let mut args = options.args.into_iter();
        let path = args.next().unwrap_or_default();

        let id = self.next_id();
        let container = ActualContainer {
            id: id.clone(),
            name: options.name,
            ip: options.ip,
            image_id: self.image_id(&options.image),
            image: options.image,
            path,
            args: args.collect(),
            env: options.env,
            labels: options.labels,
            endpoint_id: format!("ep_{id}"),
            status: "running".to_string(),
            created: Utc::now(),
        };

        self.containers.lock().await.insert(id.clone(), container);
        debug!(id = %id, "[MOCK] Container running");
        Ok(id)
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        if self.fail_requests {
            return Err(RuntimeError::Request(
                "mock runtime configured to fail".to_string(),
            ));
        }

        info!(id = %id, "[MOCK] Removing container");
        self.containers
            .lock()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound { id: id.to_string() })
    }
}
