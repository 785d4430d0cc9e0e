//! In-memory working set for one placement pass.

use std::collections::{BTreeSet, HashMap};

use berth_db::{Container, Image, Minion, Placement, Role};
use tracing::debug;

/// A schedulable worker and the containers currently assigned to it.
#[derive(Debug, Clone)]
pub(crate) struct WorkerSlot {
    pub(crate) minion: Minion,
    /// Indices into `PlacementContext::containers`.
    pub(crate) containers: Vec<usize>,
}

/// Working set for a placement pass.
///
/// Containers live in one arena; workers and the unassigned list refer to
/// them by index so that a container moves between lists without copies.
/// Every container whose row must be written back is recorded in `changed`.
#[derive(Debug, Clone)]
pub struct PlacementContext {
    pub(crate) containers: Vec<Container>,
    pub(crate) workers: Vec<WorkerSlot>,
    pub(crate) unassigned: Vec<usize>,
    pub(crate) constraints: Vec<Placement>,
    pub(crate) changed: BTreeSet<usize>,
}

impl PlacementContext {
    /// Build the working set.
    ///
    /// - Only workers with a private IP are schedulable.
    /// - A container assigned to a worker that is gone is unassigned.
    /// - A container built from a Dockerfile is left out until its image is
    ///   built; its `image_id` is updated to the built artifact.
    /// - The unassigned list is sorted by `(image, command, blueprint_id)`.
    pub fn build(
        minions: Vec<Minion>,
        containers: Vec<Container>,
        constraints: Vec<Placement>,
        images: &[Image],
    ) -> Self {
        let workers: Vec<WorkerSlot> = minions
            .into_iter()
            .filter(|m| m.role == Role::Worker && !m.private_ip.is_empty())
            .map(|minion| WorkerSlot {
                minion,
                containers: Vec::new(),
            })
            .collect();

        let mut ctx = Self {
            containers: Vec::with_capacity(containers.len()),
            workers,
            unassigned: Vec::new(),
            constraints,
            changed: BTreeSet::new(),
        };

        let by_ip: HashMap<String, usize> = ctx
            .workers
            .iter()
            .enumerate()
            .map(|(i, w)| (w.minion.private_ip.clone(), i))
            .collect();

        let built: HashMap<(&str, &str), &str> = images
            .iter()
            .filter(|image| image.is_built())
            .filter_map(|image| {
                let id = image.docker_id.as_deref()?;
                Some(((image.name.as_str(), image.dockerfile.as_str()), id))
            })
            .collect();

        for mut dbc in containers {
            let mut changed = false;

            if let Some(dockerfile) = &dbc.dockerfile {
                let Some(image_id) = built.get(&(dbc.image.as_str(), dockerfile.as_str())) else {
                    debug!(
                        hostname = %dbc.hostname,
                        image = %dbc.image,
                        "Container image not built yet"
                    );
                    continue;
                };
                if dbc.image_id.as_deref() != Some(*image_id) {
                    dbc.image_id = Some(image_id.to_string());
                    changed = true;
                }
            }

            let slot = dbc.minion.as_deref().and_then(|ip| by_ip.get(ip).copied());
            if slot.is_none() && dbc.minion.is_some() {
                debug!(
                    hostname = %dbc.hostname,
                    minion = ?dbc.minion,
                    "Container assigned to missing worker"
                );
                dbc.minion = None;
                changed = true;
            }

            let idx = ctx.containers.len();
            ctx.containers.push(dbc);
            if changed {
                ctx.changed.insert(idx);
            }

            match slot {
                Some(w) => ctx.workers[w].containers.push(idx),
                None => ctx.unassigned.push(idx),
            }
        }

        let containers = &ctx.containers;
        ctx.unassigned.sort_by(|&a, &b| {
            let (a, b) = (&containers[a], &containers[b]);
            (&a.image, &a.command, &a.blueprint_id).cmp(&(&b.image, &b.command, &b.blueprint_id))
        });

        ctx
    }

    /// Containers waiting for a worker, in placement order.
    pub fn unassigned(&self) -> Vec<&Container> {
        self.unassigned.iter().map(|&i| &self.containers[i]).collect()
    }

    /// Containers currently assigned to the worker with `private_ip`.
    ///
    /// Returns `None` if no schedulable worker has that IP.
    pub fn assigned(&self, private_ip: &str) -> Option<Vec<&Container>> {
        self.workers
            .iter()
            .find(|w| w.minion.private_ip == private_ip)
            .map(|w| self.peers(w))
    }

    /// Private IPs of schedulable workers.
    pub fn worker_ips(&self) -> Vec<&str> {
        self.workers
            .iter()
            .map(|w| w.minion.private_ip.as_str())
            .collect()
    }

    /// Containers whose rows must be written back.
    pub fn changed(&self) -> Vec<&Container> {
        self.changed.iter().map(|&i| &self.containers[i]).collect()
    }

    /// Consume the context, yielding the rows to commit.
    pub fn into_changes(self) -> Vec<Container> {
        let Self {
            containers,
            changed,
            ..
        } = self;
        containers
            .into_iter()
            .enumerate()
            .filter(|(i, _)| changed.contains(i))
            .map(|(_, dbc)| dbc)
            .collect()
    }

    pub(crate) fn peers(&self, worker: &WorkerSlot) -> Vec<&Container> {
        worker
            .containers
            .iter()
            .map(|&i| &self.containers[i])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use berth_db::ImageStatus;

    use super::*;

    fn worker(id: u64, ip: &str) -> Minion {
        Minion {
            id,
            role: Role::Worker,
            private_ip: ip.to_string(),
            ..Default::default()
        }
    }

    fn container(id: u64, image: &str, minion: Option<&str>) -> Container {
        Container {
            id,
            blueprint_id: format!("bp{id}"),
            hostname: format!("c{id}"),
            image: image.to_string(),
            minion: minion.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_only_workers_with_ip_are_schedulable() {
        let minions = vec![
            worker(1, "10.0.0.1"),
            worker(2, ""),
            Minion {
                role: Role::Master,
                ..worker(3, "10.0.0.3")
            },
            Minion {
                role: Role::None,
                ..worker(4, "10.0.0.4")
            },
        ];

        let ctx = PlacementContext::build(minions, vec![], vec![], &[]);
        assert_eq!(ctx.worker_ips(), vec!["10.0.0.1"]);
    }

    #[test]
    fn test_assigned_and_unassigned() {
        let ctx = PlacementContext::build(
            vec![worker(1, "10.0.0.1")],
            vec![
                container(10, "nginx", Some("10.0.0.1")),
                container(11, "nginx", None),
            ],
            vec![],
            &[],
        );

        let assigned = ctx.assigned("10.0.0.1").unwrap();
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].id, 10);
        assert_eq!(ctx.unassigned()[0].id, 11);
        assert!(ctx.changed().is_empty());
    }

    #[test]
    fn test_missing_worker_unassigns() {
        let ctx = PlacementContext::build(
            vec![worker(1, "10.0.0.1")],
            vec![container(10, "nginx", Some("10.0.0.9"))],
            vec![],
            &[],
        );

        let unassigned = ctx.unassigned();
        assert_eq!(unassigned.len(), 1);
        assert_eq!(unassigned[0].minion, None);

        let changes = ctx.into_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].id, 10);
    }

    #[test]
    fn test_unassigned_sorted() {
        let mut a = container(1, "redis", None);
        a.blueprint_id = "z".into();
        let mut b = container(2, "nginx", None);
        b.command = vec!["run".into()];
        let mut c = container(3, "nginx", None);
        c.blueprint_id = "b".into();
        let mut d = container(4, "nginx", None);
        d.blueprint_id = "a".into();

        let ctx = PlacementContext::build(vec![], vec![a, b, c, d], vec![], &[]);

        let order: Vec<u64> = ctx.unassigned().iter().map(|c| c.id).collect();
        assert_eq!(order, vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_unbuilt_images_excluded() {
        let mut dbc = container(10, "custom", None);
        dbc.dockerfile = Some("FROM alpine".into());
        let image = Image {
            id: 20,
            name: "custom".into(),
            dockerfile: "FROM alpine".into(),
            status: Some(ImageStatus::Building),
            docker_id: None,
        };

        let ctx = PlacementContext::build(vec![], vec![dbc], vec![], &[image]);
        assert!(ctx.unassigned().is_empty());
        assert!(ctx.changed().is_empty());
    }

    #[test]
    fn test_built_image_updates_image_id() {
        let mut dbc = container(10, "custom", Some("10.0.0.1"));
        dbc.dockerfile = Some("FROM alpine".into());
        let image = Image {
            id: 20,
            name: "custom".into(),
            dockerfile: "FROM alpine".into(),
            status: Some(ImageStatus::Built),
            docker_id: Some("sha256:abc".into()),
        };

        let ctx = PlacementContext::build(
            vec![worker(1, "10.0.0.1")],
            vec![dbc],
            vec![],
            &[image],
        );

        assert_eq!(ctx.assigned("10.0.0.1").unwrap().len(), 1);
        let changes = ctx.into_changes();
        assert_eq!(changes[0].image_id.as_deref(), Some("sha256:abc"));
    }

    #[test]
    fn test_image_with_other_dockerfile_does_not_count() {
        let mut dbc = container(10, "custom", None);
        dbc.dockerfile = Some("FROM alpine".into());
        let image = Image {
            id: 20,
            name: "custom".into(),
            dockerfile: "FROM debian".into(),
            status: Some(ImageStatus::Built),
            docker_id: Some("sha256:abc".into()),
        };

        let ctx = PlacementContext::build(vec![], vec![dbc], vec![], &[image]);
        assert!(ctx.unassigned().is_empty());
    }
}
