//! Load-balancing: picking the least-busy worker among a set of names the
//! dispatcher is allowed to hand an entry to.

use std::collections::HashMap;

use crate::facade::ConsumerInfo;

/// Ranking key for one candidate. Lower sorts first (wins). Components,
/// in priority order:
///
/// 1. Absent from the `XINFO CONSUMERS` snapshot (never seen by Redis,
///    i.e. truly idle) ranks ahead of present.
/// 2. Among present candidates, fewer pending entries ranks ahead.
/// 3. On a pending tie with zero inactive time, larger idle ranks ahead
///    (a "hasn't been busy recently" heuristic).
/// 4. Final tiebreak: larger idle ranks ahead regardless of inactive time.
///
/// This is a total order over the tuple, which makes the strict-weak-order
/// property immediate: it is exactly `Ord` on `(bool, u64, i64, i64)`.
type RankKey = (bool, u64, i64, i64);

fn rank_key(name: &str, snapshot: &HashMap<String, ConsumerInfo>) -> RankKey {
    match snapshot.get(name) {
        None => (false, 0, i64::MIN, i64::MIN),
        Some(info) => {
            let pending = info.pending;
            let idle = info.idle_ms as i64;
            let third = if info.inactive_ms == 0 { -idle } else { 0 };
            let fourth = -idle;
            (true, pending, third, fourth)
        }
    }
}

/// Pick the least-busy candidate out of `names`, using `snapshot` (an
/// `XINFO CONSUMERS` result, not necessarily containing every name — a
/// name absent from it is treated as never having been dispatched to).
pub fn select_worker<'a>(
    names: &'a [String],
    snapshot: &HashMap<String, ConsumerInfo>,
) -> Option<&'a str> {
    names
        .iter()
        .map(|name| (name.as_str(), rank_key(name, snapshot)))
        .min_by(|a, b| a.1.cmp(&b.1))
        .map(|(name, _)| name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(pending: u64, idle_ms: u64, inactive_ms: i64) -> ConsumerInfo {
        ConsumerInfo {
            pending,
            idle_ms,
            inactive_ms,
        }
    }

    #[test]
    fn absent_candidate_beats_present() {
        let mut snapshot = HashMap::new();
        snapshot.insert("busy".to_string(), info(5, 10, 0));
        let names = vec!["busy".to_string(), "fresh".to_string()];

        assert_eq!(select_worker(&names, &snapshot), Some("fresh"));
    }

    #[test]
    fn fewer_pending_wins_on_tie() {
        let mut snapshot = HashMap::new();
        snapshot.insert("a".to_string(), info(3, 10, 0));
        snapshot.insert("b".to_string(), info(1, 10, 0));
        let names = vec!["a".to_string(), "b".to_string()];

        assert_eq!(select_worker(&names, &snapshot), Some("b"));
    }

    #[test]
    fn larger_idle_wins_when_pending_ties_and_inactive_is_zero() {
        let mut snapshot = HashMap::new();
        snapshot.insert("a".to_string(), info(2, 50, 0));
        snapshot.insert("b".to_string(), info(2, 500, 0));
        let names = vec!["a".to_string(), "b".to_string()];

        assert_eq!(select_worker(&names, &snapshot), Some("b"));
    }

    #[test]
    fn ranking_is_a_strict_weak_order() {
        let mut snapshot = HashMap::new();
        snapshot.insert("a".to_string(), info(2, 50, 0));
        snapshot.insert("b".to_string(), info(2, 500, 7));
        snapshot.insert("c".to_string(), info(0, 0, 0));
        let names = ["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()];

        for x in &names {
            for y in &names {
                let kx = rank_key(x, &snapshot);
                let ky = rank_key(y, &snapshot);
                assert_eq!(kx.cmp(&ky).reverse(), ky.cmp(&kx));
            }
        }
    }

    #[test]
    fn empty_candidate_list_selects_nothing() {
        let snapshot = HashMap::new();
        let names: Vec<String> = vec![];
        assert_eq!(select_worker(&names, &snapshot), None);
    }
}
