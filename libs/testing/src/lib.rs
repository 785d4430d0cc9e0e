//! Row fixtures for berth tests.

use berth_db::{
    Container, ContainerValue, Database, DbError, Image, ImageStatus, Leadership, Minion,
    Placement, Role, Row,
};

/// A worker machine with `ip` as its private IP.
pub fn worker(ip: &str) -> Minion {
    Minion {
        role: Role::Worker,
        private_ip: ip.to_string(),
        provider: "aws".to_string(),
        region: "us-west-1".to_string(),
        size: "m4.large".to_string(),
        ..Default::default()
    }
}

/// A master machine with `ip` as its private IP.
pub fn master(ip: &str) -> Minion {
    Minion {
        role: Role::Master,
        ..worker(ip)
    }
}

/// Mark `minion` as the local machine.
pub fn local(minion: Minion) -> Minion {
    Minion {
        is_self: true,
        ..minion
    }
}

/// Leadership held by this process.
pub fn leader() -> Leadership {
    Leadership {
        leader: true,
        ..Default::default()
    }
}

/// An unassigned container. The blueprint id is the hostname.
pub fn container(hostname: &str, image: &str) -> Container {
    Container {
        blueprint_id: hostname.to_string(),
        hostname: hostname.to_string(),
        image: image.to_string(),
        ..Default::default()
    }
}

/// A container assigned to `minion` with overlay address `ip`.
pub fn assigned(hostname: &str, image: &str, minion: &str, ip: &str) -> Container {
    Container {
        minion: Some(minion.to_string()),
        ip: Some(ip.to_string()),
        ..container(hostname, image)
    }
}

/// `container` with env `key` set to secret `name`.
pub fn with_secret_env(mut container: Container, key: &str, name: &str) -> Container {
    container
        .env
        .insert(key.to_string(), ContainerValue::Secret(name.to_string()));
    container
}

/// Forbid `a` and `b` from sharing a worker.
pub fn exclusive_pair(a: &str, b: &str) -> Placement {
    Placement {
        target_container: a.to_string(),
        other_container: Some(b.to_string()),
        exclusive: true,
        ..Default::default()
    }
}

/// A machine rule on `target`; set attributes on the result.
pub fn machine_rule(target: &str, exclusive: bool) -> Placement {
    Placement {
        target_container: target.to_string(),
        exclusive,
        ..Default::default()
    }
}

/// A built image.
pub fn built_image(name: &str, dockerfile: &str, docker_id: &str) -> Image {
    Image {
        name: name.to_string(),
        dockerfile: dockerfile.to_string(),
        status: Some(ImageStatus::Built),
        docker_id: Some(docker_id.to_string()),
        ..Default::default()
    }
}

/// Commit `rows` in one transaction and return them with their ids.
pub fn commit_all<R: Row>(
    db: &Database,
    rows: impl IntoIterator<Item = R>,
) -> Result<Vec<R>, DbError> {
    db.txn(&[R::TABLE]).run(|view| {
        rows.into_iter()
            .map(|mut row| -> Result<R, DbError> {
                let id = view.commit(row.clone())?;
                row.set_id(id);
                Ok(row)
            })
            .collect()
    })
}
