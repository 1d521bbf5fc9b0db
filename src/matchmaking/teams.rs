//! Team formation for a selected match pool
//!
//! The pool arrives in seniority order. The split is a plain alternation:
//! the 1st, 3rd, 5th... most senior players form team A and the rest form
//! team B. No skill or role balancing is attempted.

use crate::types::{QueueEntry, TeamSplit};

/// Trait for team formation policies
pub trait TeamFormation: Send + Sync {
    /// Split a seniority-ordered pool into two teams
    fn form_teams(&self, pool: Vec<QueueEntry>) -> TeamSplit<QueueEntry>;
}

/// Alternating split by seniority
#[derive(Debug, Clone, Copy, Default)]
pub struct AlternatingTeamFormation;

impl TeamFormation for AlternatingTeamFormation {
    fn form_teams(&self, pool: Vec<QueueEntry>) -> TeamSplit<QueueEntry> {
        alternate(pool)
    }
}

/// Even indices to team A, odd indices to team B, order preserved
pub fn alternate<T>(items: impl IntoIterator<Item = T>) -> TeamSplit<T> {
    let mut split = TeamSplit {
        team_a: Vec::new(),
        team_b: Vec::new(),
    };

    for (index, item) in items.into_iter().enumerate() {
        if index % 2 == 0 {
            split.team_a.push(item);
        } else {
            split.team_b.push(item);
        }
    }
    split
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ten_players_split_into_odd_and_even_positions() {
        let split = alternate(1..=10);

        assert_eq!(split.team_a, vec![1, 3, 5, 7, 9]);
        assert_eq!(split.team_b, vec![2, 4, 6, 8, 10]);
    }

    #[test]
    fn test_empty_pool() {
        let split: TeamSplit<u8> = alternate(Vec::new());
        assert!(split.team_a.is_empty());
        assert!(split.team_b.is_empty());
    }

    proptest! {
        #[test]
        fn prop_alternation_is_a_balanced_partition(items in proptest::collection::vec(any::<u32>(), 0..64)) {
            let split = alternate(items.clone());

            prop_assert_eq!(split.team_a.len() + split.team_b.len(), items.len());
            prop_assert!(split.team_a.len() - split.team_b.len() <= 1);

            // Interleaving the teams back gives the original order
            let mut rebuilt = Vec::with_capacity(items.len());
            for i in 0..split.team_a.len() {
                rebuilt.push(split.team_a[i]);
                if let Some(b) = split.team_b.get(i) {
                    rebuilt.push(*b);
                }
            }
            prop_assert_eq!(rebuilt, items);
        }
    }
}
