// src/services/core/multileave/mod.rs
//
// Team-draft multileaving: fuses K ranked lists into one, crediting each
// element to the system that contributed it. Grounded line-for-line on
// `team_draft_multileave.py`'s `TeamDraftMultiLeaver`. Pure and synchronous:
// no I/O, no ledger access.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashMap, VecDeque};

/// Per-instance fairness counter and multileave policy. Construct one per
/// batch (spec.md §9 open question (ii)): a longer-lived counter is also
/// sound but this crate follows the construct-per-batch convention.
pub struct TeamDraftMultileaver {
    ranking_length: usize,
    systems_per_ranking: usize,
    common_prefix: bool,
    impressions: HashMap<i64, u32>,
}

impl TeamDraftMultileaver {
    pub fn new(ranking_length: usize, systems_per_ranking: usize, common_prefix: bool) -> Self {
        Self {
            ranking_length,
            systems_per_ranking,
            common_prefix,
            impressions: HashMap::new(),
        }
    }

    /// Selects up to `systems_per_ranking` systems from `systems`, preferring
    /// those with fewer cumulative impressions (spec.md C2.5).
    pub fn select_systems_for_multileaving(
        &mut self,
        systems: &[i64],
        rng: &mut impl Rng,
    ) -> Vec<i64> {
        let mut impressions: HashMap<i64, u32> = systems
            .iter()
            .map(|&s| (s, *self.impressions.get(&s).unwrap_or(&0)))
            .collect();

        let mut candidates = Vec::new();
        while candidates.len() < self.systems_per_ranking && !impressions.is_empty() {
            let min_impressions = *impressions.values().min().unwrap();
            let min_systems: Vec<i64> = impressions
                .iter()
                .filter(|(_, &count)| count == min_impressions)
                .map(|(&s, _)| s)
                .collect();
            let system = *min_systems.choose(rng).unwrap();

            impressions.remove(&system);
            candidates.push(system);
            *self.impressions.entry(system).or_insert(0) += 1;
        }

        candidates
    }

    /// Fuses `rankings` (system_id -> ordered, distinct-item list) into one
    /// ranking plus a parallel per-position credit vector, per spec.md C2.
    pub fn multileave<T>(
        &mut self,
        rankings: &HashMap<i64, Vec<T>>,
        rng: &mut impl Rng,
    ) -> (Vec<T>, Vec<Option<i64>>)
    where
        T: Clone + PartialEq + Ord,
    {
        let candidate_systems: Vec<i64> = rankings
            .iter()
            .filter(|(_, ranking)| !ranking.is_empty())
            .map(|(&system, _)| system)
            .collect();
        let mut active_systems = self.select_systems_for_multileaving(&candidate_systems, rng);

        let mut remaining: HashMap<i64, VecDeque<T>> = active_systems
            .iter()
            .map(|&system| (system, rankings[&system].clone().into_iter().collect()))
            .collect();

        let mut multileaved: Vec<T> = Vec::new();
        let mut credit: Vec<Option<i64>> = Vec::new();

        if self.common_prefix {
            let lists: Vec<&Vec<T>> = active_systems.iter().map(|s| &rankings[s]).collect();
            let prefix = common_prefix(&lists);
            credit.extend(prefix.iter().map(|_| None));
            multileaved.extend(prefix);
        }

        let mut round_queue: Vec<i64> = Vec::new();

        while multileaved.len() < self.ranking_length && !active_systems.is_empty() {
            if round_queue.is_empty() {
                round_queue = active_systems.clone();
                round_queue.shuffle(rng);
            }
            let system = round_queue.pop().unwrap();

            let queue = remaining.get_mut(&system).unwrap();
            while let Some(front) = queue.front() {
                if multileaved.contains(front) {
                    queue.pop_front();
                } else {
                    break;
                }
            }
            if let Some(item) = queue.pop_front() {
                multileaved.push(item);
                credit.push(Some(system));
            }

            if remaining[&system].is_empty() {
                active_systems.retain(|&s| s != system);
                round_queue.retain(|&s| s != system);
            }
        }

        (multileaved, credit)
    }
}

/// Longest prefix shared by every list in `lists`, found by comparing the
/// lexicographically smallest and largest list (every list between them, in
/// lexicographic order, shares at least this prefix with both).
fn common_prefix<T: Clone + PartialEq + Ord>(lists: &[&Vec<T>]) -> Vec<T> {
    if lists.is_empty() {
        return Vec::new();
    }
    let first = lists.iter().min().unwrap();
    let last = lists.iter().max().unwrap();
    let mut prefix = Vec::new();
    for (a, b) in first.iter().zip(last.iter()) {
        if a != b {
            break;
        }
        prefix.push(a.clone());
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rankings_fixture() -> HashMap<i64, Vec<String>> {
        let mut rankings = HashMap::new();
        rankings.insert(10, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        rankings.insert(20, vec!["b".to_string(), "d".to_string(), "e".to_string()]);
        rankings
    }

    #[test]
    fn ranking_contains_no_duplicates() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let mut multileaver = TeamDraftMultileaver::new(4, 2, false);
        let (ranking, _credit) = multileaver.multileave(&rankings_fixture(), &mut rng);
        let mut seen = std::collections::HashSet::new();
        assert!(ranking.iter().all(|item| seen.insert(item.clone())));
    }

    #[test]
    fn credit_references_only_contributing_systems() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut multileaver = TeamDraftMultileaver::new(4, 2, false);
        let rankings = rankings_fixture();
        let (ranking, credit) = multileaver.multileave(&rankings, &mut rng);
        for (item, system) in ranking.iter().zip(credit.iter()) {
            if let Some(system) = system {
                assert!(rankings[system].contains(item));
            }
        }
    }

    #[test]
    fn length_is_bounded_by_l_and_total_items() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let mut multileaver = TeamDraftMultileaver::new(100, 2, false);
        let rankings = rankings_fixture();
        let total_items: usize = rankings.values().map(|v| v.len()).sum();
        let (ranking, _credit) = multileaver.multileave(&rankings, &mut rng);
        assert!(ranking.len() <= 100);
        assert!(ranking.len() <= total_items);
    }

    #[test]
    fn fair_selection_is_within_tolerance_over_many_invocations() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(99);
        let mut multileaver = TeamDraftMultileaver::new(3, 3, false);
        let mut rankings = HashMap::new();
        for system in [1, 2, 3, 4, 5] {
            rankings.insert(system, vec![system.to_string()]);
        }
        let mut counts: HashMap<i64, u32> = HashMap::new();
        for _ in 0..1000 {
            let (_ranking, credit) = multileaver.multileave(&rankings, &mut rng);
            for system in credit.into_iter().flatten() {
                *counts.entry(system).or_insert(0) += 1;
            }
        }
        for system in [1, 2, 3, 4, 5] {
            let count = *counts.get(&system).unwrap_or(&0) as f64;
            assert!((count - 600.0).abs() <= 600.0 * 0.05, "system {system} got {count}");
        }
    }

    #[test]
    fn common_prefix_is_credited_to_none() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let mut multileaver = TeamDraftMultileaver::new(5, 2, true);
        let mut rankings = HashMap::new();
        rankings.insert(10, vec!["x".to_string(), "a".to_string()]);
        rankings.insert(20, vec!["x".to_string(), "b".to_string()]);
        let (ranking, credit) = multileaver.multileave(&rankings, &mut rng);
        assert_eq!(ranking[0], "x");
        assert_eq!(credit[0], None);
    }

    #[test]
    fn empty_input_produces_empty_output() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        let mut multileaver = TeamDraftMultileaver::new(4, 2, false);
        let (ranking, credit) = multileaver.multileave::<String>(&HashMap::new(), &mut rng);
        assert!(ranking.is_empty());
        assert!(credit.is_empty());
    }

    #[test]
    fn fewer_than_k_available_systems_uses_all_of_them() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let mut multileaver = TeamDraftMultileaver::new(4, 5, false);
        let selected = multileaver.select_systems_for_multileaving(&[10, 20], &mut rng);
        assert_eq!(selected.len(), 2);
    }
}
