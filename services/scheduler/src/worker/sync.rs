//! Diff desired containers against the runtime.

use berth_db::Container;
use berth_reconcile::{join, Score};

use super::evaluate::EvaluatedContainer;
use crate::runtime::{ActualContainer, FILES_LABEL};

/// Scores a desired container against a running one.
///
/// Only exact matches pair; there is no partial credit.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeMatch;

impl Score<EvaluatedContainer, ActualContainer> for RuntimeMatch {
    fn score(&self, desired: &EvaluatedContainer, actual: &ActualContainer) -> i32 {
        if runtime_matches(desired, actual) {
            0
        } else {
            -1
        }
    }
}

fn runtime_matches(desired: &EvaluatedContainer, actual: &ActualContainer) -> bool {
    let dbc = &desired.container;

    if dbc.ip.as_deref().unwrap_or_default() != actual.ip {
        return false;
    }

    let digest = desired.files_digest();
    if actual.labels.get(FILES_LABEL).map(String::as_str) != Some(digest.as_str()) {
        return false;
    }

    let image_matches = match &dbc.image_id {
        Some(image_id) => *image_id == actual.image_id,
        None => dbc.image == actual.image,
    };
    if !image_matches {
        return false;
    }

    let env_matches = desired
        .env
        .iter()
        .all(|(key, value)| actual.env.get(key) == Some(value));
    if !env_matches {
        return false;
    }

    command_matches(&dbc.command, &actual.path, &actual.args)
}

/// The runtime may have moved the first argument into `path`, so the
/// command matches either `args` or `path` followed by `args`.
fn command_matches(command: &[String], path: &str, args: &[String]) -> bool {
    if command.is_empty() || command == args {
        return true;
    }
    match command.split_first() {
        Some((first, rest)) => first == path && rest == args,
        None => false,
    }
}

/// What a worker must do to converge.
#[derive(Debug, Default)]
pub struct SyncPlan {
    /// Matched containers whose runtime fields changed.
    pub changed: Vec<Container>,
    pub to_boot: Vec<EvaluatedContainer>,
    pub to_kill: Vec<ActualContainer>,
}

/// Forget the runtime container a row was bound to. Returns true if the row
/// changed.
pub(crate) fn clear_runtime_fields(dbc: &mut Container) -> bool {
    let bound = dbc.docker_id.is_some()
        || dbc.endpoint_id.is_some()
        || dbc.created.is_some()
        || !dbc.status.is_empty();

    dbc.docker_id = None;
    dbc.endpoint_id = None;
    dbc.created = None;
    dbc.status.clear();
    bound
}

/// Match ready containers against running ones.
///
/// Matched rows pick up the runtime's id, endpoint, status and creation
/// time; rows already carrying those values are not reported as changed.
/// Unmatched rows drop whatever runtime container they were bound to.
pub fn sync_worker(ready: Vec<EvaluatedContainer>, actual: Vec<ActualContainer>) -> SyncPlan {
    let joined = join(ready, actual, RuntimeMatch);

    let mut changed: Vec<Container> = joined
        .pairs
        .into_iter()
        .filter_map(|pair| {
            let mut dbc = pair.left.container;
            let before = dbc.clone();
            let actual = pair.right;

            dbc.docker_id = Some(actual.id);
            dbc.endpoint_id = Some(actual.endpoint_id).filter(|id| !id.is_empty());
            dbc.status = actual.status;
            dbc.created = Some(actual.created);

            (dbc != before).then_some(dbc)
        })
        .collect();

    changed.extend(joined.lonely_left.iter().filter_map(|evaluated| {
        let mut dbc = evaluated.container.clone();
        clear_runtime_fields(&mut dbc).then_some(dbc)
    }));

    SyncPlan {
        changed,
        to_boot: joined.lonely_left,
        to_kill: joined.lonely_right,
    }
}
