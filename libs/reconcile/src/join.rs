//! Greedy score-based and hash-based collection matching.

use std::collections::HashMap;
use std::hash::Hash;

/// A matched (left, right) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair<L, R> {
    pub left: L,
    pub right: R,
}

/// Output of a join.
///
/// `lonely_left` and `lonely_right` hold the elements that found no partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Joined<L, R> {
    pub pairs: Vec<Pair<L, R>>,
    pub lonely_left: Vec<L>,
    pub lonely_right: Vec<R>,
}

impl<L, R> Default for Joined<L, R> {
    fn default() -> Self {
        Self {
            pairs: Vec::new(),
            lonely_left: Vec::new(),
            lonely_right: Vec::new(),
        }
    }
}

/// Compatibility between a left and a right element.
///
/// - `0`: an exact match, paired immediately.
/// - `> 0`: a candidate; lower scores are preferred.
/// - `< 0`: never paired.
pub trait Score<L, R> {
    fn score(&self, left: &L, right: &R) -> i32;
}

impl<L, R, F> Score<L, R> for F
where
    F: Fn(&L, &R) -> i32,
{
    fn score(&self, left: &L, right: &R) -> i32 {
        self(left, right)
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: i32,
    left: usize,
    right: usize,
}

/// Pair `left` with `right` using `scorer`.
///
/// Zero-score pairs are committed as soon as they are found, taking the first
/// unconsumed right element in order. Positive-score candidates are then
/// committed greedily, lowest score first, ties in generation order. This is
/// a heuristic: the total score of the result is not guaranteed minimal.
///
/// Lonely elements keep their original relative order.
pub fn join<L, R, S>(left: Vec<L>, right: Vec<R>, scorer: S) -> Joined<L, R>
where
    S: Score<L, R>,
{
    let mut left_used = vec![false; left.len()];
    let mut right_used = vec![false; right.len()];
    let mut unmatched_left = left.len();
    let mut unmatched_right = right.len();

    let mut matched: Vec<(usize, usize)> = Vec::new();
    let mut candidates: Vec<Candidate> = Vec::new();

    for (i, l) in left.iter().enumerate() {
        if unmatched_right == 0 {
            break;
        }

        for (j, r) in right.iter().enumerate() {
            if right_used[j] {
                continue;
            }

            let score = scorer.score(l, r);
            if score == 0 {
                left_used[i] = true;
                right_used[j] = true;
                unmatched_left -= 1;
                unmatched_right -= 1;
                matched.push((i, j));
                break;
            }

            if score > 0 {
                candidates.push(Candidate {
                    score,
                    left: i,
                    right: j,
                });
            }
        }
    }

    // Stable: equal scores stay in generation order.
    candidates.sort_by_key(|c| c.score);

    for candidate in candidates {
        if unmatched_left == 0 || unmatched_right == 0 {
            break;
        }
        if left_used[candidate.left] || right_used[candidate.right] {
            continue;
        }

        left_used[candidate.left] = true;
        right_used[candidate.right] = true;
        unmatched_left -= 1;
        unmatched_right -= 1;
        matched.push((candidate.left, candidate.right));
    }

    let mut left: Vec<Option<L>> = left.into_iter().map(Some).collect();
    let mut right: Vec<Option<R>> = right.into_iter().map(Some).collect();

    let pairs = matched
        .into_iter()
        .filter_map(|(i, j)| match (left[i].take(), right[j].take()) {
            (Some(left), Some(right)) => Some(Pair { left, right }),
            _ => None,
        })
        .collect();

    Joined {
        pairs,
        lonely_left: left.into_iter().flatten().collect(),
        lonely_right: right.into_iter().flatten().collect(),
    }
}

/// Pair `left` with `right` where `left_key(l) == right_key(r)`.
///
/// Runs in O(|left| + |right|). Each left element is used at most once.
///
/// If two left elements share a key, the later one replaces the earlier one,
/// and the earlier one is dropped from the output entirely. The order of
/// `lonely_left` is unspecified; sort it if you need determinism.
pub fn hash_join<L, R, K, FL, FR>(
    left: Vec<L>,
    right: Vec<R>,
    left_key: FL,
    right_key: FR,
) -> Joined<L, R>
where
    K: Eq + Hash,
    FL: Fn(&L) -> K,
    FR: Fn(&R) -> K,
{
    let mut by_key: HashMap<K, L> = HashMap::with_capacity(left.len());
    for l in left {
        by_key.insert(left_key(&l), l);
    }

    let mut joined = Joined::default();
    for r in right {
        match by_key.remove(&right_key(&r)) {
            Some(l) => joined.pairs.push(Pair { left: l, right: r }),
            None => joined.lonely_right.push(r),
        }
    }

    joined.lonely_left = by_key.into_values().collect();
    joined
}

/// [`hash_join`] where each element is its own key.
///
/// When only one side is keyed by value, call [`hash_join`] with a clone or
/// copy closure for that side, e.g. `hash_join(ips, nodes, String::clone, |n| n.ip.clone())`.
pub fn hash_join_by_value<T>(left: Vec<T>, right: Vec<T>) -> Joined<T, T>
where
    T: Eq + Hash + Clone,
{
    hash_join(left, right, T::clone, T::clone)
}
