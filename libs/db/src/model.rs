//! Row types stored in the database.
//!
//! Rows are plain data. Which subsystem writes which field matters more than
//! the fields themselves:
//!
//! - `Container.minion` is written only by the master scheduler.
//! - `Container.docker_id`, `endpoint_id`, `status`, `created` are written
//!   only by the worker reconciler on the machine the container runs on.
//! - `Minion` rows are written by machine provisioning and are read-only to
//!   scheduling.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::table::RowId;

/// A value in a container's environment or file map.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ContainerValue {
    /// Used as-is.
    Literal(String),
    /// Resolved from the secret store at boot time.
    Secret(String),
}

impl ContainerValue {
    /// Name of the referenced secret, if this is a secret reference.
    pub fn secret_name(&self) -> Option<&str> {
        match self {
            ContainerValue::Secret(name) => Some(name),
            ContainerValue::Literal(_) => None,
        }
    }
}

impl From<&str> for ContainerValue {
    fn from(value: &str) -> Self {
        ContainerValue::Literal(value.to_string())
    }
}

/// A host path mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VolumeMount {
    pub source: String,
    pub target: String,
}

/// A container the blueprint says should exist somewhere in the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: RowId,

    /// Caller-assigned identity, stable across blueprint recompiles.
    pub blueprint_id: String,
    pub hostname: String,

    pub image: String,
    /// Set when the image is built from `dockerfile`.
    pub image_id: Option<String>,
    pub dockerfile: Option<String>,
    pub command: Vec<String>,
    pub env: BTreeMap<String, ContainerValue>,
    pub filepath_to_content: BTreeMap<String, ContainerValue>,
    pub privileged: bool,
    pub volume_mounts: Vec<VolumeMount>,

    /// Overlay IP, assigned by the network layer.
    pub ip: Option<String>,

    /// Private IP of the worker this container is assigned to.
    pub minion: Option<String>,

    pub docker_id: Option<String>,
    pub endpoint_id: Option<String>,
    pub status: String,
    pub created: Option<DateTime<Utc>>,
}

impl Container {
    /// Returns true if this container must be built before it can run.
    pub fn needs_build(&self) -> bool {
        self.dockerfile.is_some()
    }
}

/// Role of a machine in the cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    None,
    Worker,
    Master,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::None => write!(f, "none"),
            Role::Worker => write!(f, "worker"),
            Role::Master => write!(f, "master"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(Role::None),
            "worker" => Ok(Role::Worker),
            "master" => Ok(Role::Master),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A machine in the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Minion {
    pub id: RowId,
    pub role: Role,
    pub private_ip: String,
    pub public_ip: String,

    pub provider: String,
    pub region: String,
    pub size: String,
    pub floating_ip: String,

    /// Marks the row describing the local machine.
    pub is_self: bool,
}

/// A placement rule from the blueprint.
///
/// Either `other_container` is set (container-to-container rule) or one or
/// more machine attributes are set (container-to-machine rule). `exclusive`
/// inverts the rule: exclusive forbids the match, inclusive requires it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub id: RowId,
    pub target_container: String,
    pub exclusive: bool,

    pub other_container: Option<String>,

    pub provider: Option<String>,
    pub region: Option<String>,
    pub size: Option<String>,
    pub floating_ip: Option<String>,
}

/// Build progress of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    Building,
    Built,
}

/// An image built from a Dockerfile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: RowId,
    pub name: String,
    pub dockerfile: String,
    pub status: Option<ImageStatus>,
    /// Digest of the built artifact.
    pub docker_id: Option<String>,
}

impl Image {
    pub fn is_built(&self) -> bool {
        self.status == Some(ImageStatus::Built)
    }
}

/// Leadership as decided by the consensus layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leadership {
    pub id: RowId,
    /// True when this process is the cluster leader.
    pub leader: bool,
    pub leader_ip: Option<String>,
}
