//! Secret substitution for desired containers.

use std::collections::{BTreeMap, BTreeSet};

use berth_db::{Container, ContainerValue};
use berth_reconcile::ContentDigest;

use crate::runtime::{RunOptions, FILES_LABEL, MANAGED_LABEL};

/// A container with every secret reference replaced by its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluatedContainer {
    pub container: Container,
    pub env: BTreeMap<String, String>,
    pub filepath_to_content: BTreeMap<String, String>,
}

impl EvaluatedContainer {
    /// Digest of the resolved file map, stamped on the running container.
    pub fn files_digest(&self) -> ContentDigest {
        ContentDigest::of_files(&self.filepath_to_content)
    }

    /// Runtime options to boot this container.
    pub fn run_options(&self) -> RunOptions {
        let dbc = &self.container;
        let labels = BTreeMap::from([
            (MANAGED_LABEL.to_string(), "true".to_string()),
            (FILES_LABEL.to_string(), self.files_digest().to_string()),
        ]);

        RunOptions {
            name: dbc.hostname.clone(),
            hostname: dbc.hostname.clone(),
            image: dbc.image_id.clone().unwrap_or_else(|| dbc.image.clone()),
            args: dbc.command.clone(),
            env: self.env.clone(),
            filepath_to_content: self.filepath_to_content.clone(),
            labels,
            ip: dbc.ip.clone().unwrap_or_default(),
            privileged: dbc.privileged,
            volume_mounts: dbc.volume_mounts.clone(),
        }
    }
}

/// Names of every secret referenced by `containers`.
pub fn referenced_secrets<'a>(
    containers: impl IntoIterator<Item = &'a Container>,
) -> BTreeSet<String> {
    containers
        .into_iter()
        .flat_map(|dbc| dbc.env.values().chain(dbc.filepath_to_content.values()))
        .filter_map(ContainerValue::secret_name)
        .map(str::to_string)
        .collect()
}

/// Substitute secrets in `dbc` from `resolved`.
///
/// On failure returns the sorted names of the secrets that are missing.
pub fn evaluate(
    dbc: &Container,
    resolved: &BTreeMap<String, String>,
) -> Result<EvaluatedContainer, Vec<String>> {
    let mut missing = BTreeSet::new();
    let env = substitute(&dbc.env, resolved, &mut missing);
    let filepath_to_content = substitute(&dbc.filepath_to_content, resolved, &mut missing);

    if !missing.is_empty() {
        return Err(missing.into_iter().collect());
    }

    Ok(EvaluatedContainer {
        container: dbc.clone(),
        env,
        filepath_to_content,
    })
}

/// Status shown on a container blocked on `missing` secrets.
pub fn waiting_status(missing: &[String]) -> String {
    format!("Waiting for secrets: {}", missing.join(", "))
}

fn substitute(
    values: &BTreeMap<String, ContainerValue>,
    resolved: &BTreeMap<String, String>,
    missing: &mut BTreeSet<String>,
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (key, value) in values {
        match value {
            ContainerValue::Literal(s) => {
                out.insert(key.clone(), s.clone());
            }
            ContainerValue::Secret(name) => match resolved.get(name) {
                Some(s) => {
                    out.insert(key.clone(), s.clone());
                }
                None => {
                    missing.insert(name.clone());
                }
            },
        }
    }
    out
}
