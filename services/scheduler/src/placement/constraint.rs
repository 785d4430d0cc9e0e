//! Placement rule evaluation.

use berth_db::{Container, Minion, Placement};

/// Returns true if `dbc` may run on `worker` alongside `peers`.
///
/// - Exclusive container rules forbid `dbc` from sharing a worker with the
///   other named container, in either direction.
/// - Inclusive container rules are not enforced.
/// - Machine rules targeting `dbc` compare each named attribute against the
///   worker; the placement is invalid when `exclusive == matches`.
///
/// `dbc` is never treated as its own peer.
pub fn valid_placement(
    constraints: &[Placement],
    worker: &Minion,
    peers: &[&Container],
    dbc: &Container,
) -> bool {
    for constraint in constraints {
        if let Some(other) = &constraint.other_container {
            if !constraint.exclusive {
                continue;
            }

            let conflict = peers
                .iter()
                .filter(|peer| peer.id != dbc.id)
                .any(|peer| {
                    is_pair(
                        &constraint.target_container,
                        other,
                        &dbc.hostname,
                        &peer.hostname,
                    )
                });
            if conflict {
                return false;
            }
            continue;
        }

        if constraint.target_container != dbc.hostname {
            continue;
        }

        let attributes = [
            (&constraint.provider, &worker.provider),
            (&constraint.region, &worker.region),
            (&constraint.size, &worker.size),
            (&constraint.floating_ip, &worker.floating_ip),
        ];
        for (wanted, actual) in attributes {
            let Some(wanted) = wanted else {
                continue;
            };
            let matches = wanted == actual;
            if constraint.exclusive == matches {
                return false;
            }
        }
    }

    true
}

/// Unordered comparison of `{target, other}` against `{a, b}`.
fn is_pair(target: &str, other: &str, a: &str, b: &str) -> bool {
    (target == a && other == b) || (target == b && other == a)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn container(id: u64, hostname: &str) -> Container {
        Container {
            id,
            hostname: hostname.to_string(),
            ..Default::default()
        }
    }

    fn worker(provider: &str) -> Minion {
        Minion {
            provider: provider.to_string(),
            region: "us-west-1".to_string(),
            size: "m4.large".to_string(),
            ..Default::default()
        }
    }

    fn exclusive_pair(target: &str, other: &str) -> Placement {
        Placement {
            target_container: target.to_string(),
            other_container: Some(other.to_string()),
            exclusive: true,
            ..Default::default()
        }
    }

    fn provider_rule(target: &str, provider: &str, exclusive: bool) -> Placement {
        Placement {
            target_container: target.to_string(),
            provider: Some(provider.to_string()),
            exclusive,
            ..Default::default()
        }
    }

    #[test]
    fn test_no_constraints_always_valid() {
        let a = container(1, "a");
        let b = container(2, "b");
        assert!(valid_placement(&[], &worker("aws"), &[&b], &a));
    }

    #[test]
    fn test_exclusive_pair_blocks_colocation() {
        let constraints = [exclusive_pair("a", "b")];
        let a = container(1, "a");
        let b = container(2, "b");
        let c = container(3, "c");

        assert!(!valid_placement(&constraints, &worker("aws"), &[&b], &a));
        assert!(valid_placement(&constraints, &worker("aws"), &[&c], &a));
        assert!(valid_placement(&constraints, &worker("aws"), &[], &a));
    }

    #[test]
    fn test_exclusive_pair_is_unordered() {
        let constraints = [exclusive_pair("a", "b")];
        let a = container(1, "a");
        let b = container(2, "b");

        assert!(!valid_placement(&constraints, &worker("aws"), &[&a], &b));
    }

    #[test]
    fn test_container_is_not_its_own_peer() {
        let constraints = [exclusive_pair("a", "a")];
        let a = container(1, "a");

        assert!(valid_placement(&constraints, &worker("aws"), &[&a], &a));
    }

    #[test]
    fn test_inclusive_pair_not_enforced() {
        let constraints = [Placement {
            exclusive: false,
            ..exclusive_pair("a", "b")
        }];
        let a = container(1, "a");

        assert!(valid_placement(&constraints, &worker("aws"), &[], &a));
    }

    #[rstest]
    #[case::exclusive_on_match("aws", true, false)]
    #[case::exclusive_elsewhere("gce", true, true)]
    #[case::inclusive_on_match("aws", false, true)]
    #[case::inclusive_elsewhere("gce", false, false)]
    fn test_provider_rule(
        #[case] worker_provider: &str,
        #[case] exclusive: bool,
        #[case] expected: bool,
    ) {
        let constraints = [provider_rule("a", "aws", exclusive)];
        let a = container(1, "a");

        assert_eq!(
            valid_placement(&constraints, &worker(worker_provider), &[], &a),
            expected
        );
    }

    #[test]
    fn test_machine_rule_only_applies_to_target() {
        let constraints = [provider_rule("a", "aws", false)];
        let b = container(2, "b");

        assert!(valid_placement(&constraints, &worker("gce"), &[], &b));
    }

    #[rstest]
    #[case::region(
        Placement { region: Some("us-west-1".into()), ..Default::default() },
        Placement { region: Some("eu-central-1".into()), ..Default::default() }
    )]
    #[case::size(
        Placement { size: Some("m4.large".into()), ..Default::default() },
        Placement { size: Some("m4.xlarge".into()), ..Default::default() }
    )]
    fn test_other_machine_attributes(#[case] matching: Placement, #[case] other: Placement) {
        let a = container(1, "a");
        let w = worker("aws");
        let rule = |p: Placement, exclusive: bool| Placement {
            target_container: "a".into(),
            exclusive,
            ..p
        };

        assert!(valid_placement(&[rule(matching.clone(), false)], &w, &[], &a));
        assert!(!valid_placement(&[rule(matching, true)], &w, &[], &a));
        assert!(!valid_placement(&[rule(other.clone(), false)], &w, &[], &a));
        assert!(valid_placement(&[rule(other, true)], &w, &[], &a));
    }

    #[test]
    fn test_floating_ip_rule() {
        let mut w = worker("aws");
        w.floating_ip = "8.8.8.8".into();
        let a = container(1, "a");
        let constraints = [Placement {
            target_container: "a".into(),
            floating_ip: Some("8.8.8.8".into()),
            ..Default::default()
        }];

        assert!(valid_placement(&constraints, &w, &[], &a));
        assert!(!valid_placement(&constraints, &worker("aws"), &[], &a));
    }
}
