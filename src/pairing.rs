//! Round-robin pairing for a Velvet Hour round.
//!
//! Pure logic: given the present participants and the set of pairs already
//! used this session, produce disjoint pairs for the next round such that no
//! pair repeats. Greedy over a seeded shuffle; the caller supplies the seed
//! so rounds are randomized in production and deterministic under test.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

/// Color labels cycled over the matches of a round.
pub const MATCH_COLORS: [&str; 8] = [
    "red", "blue", "green", "purple", "orange", "yellow", "pink", "cyan",
];

/// Pairing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PairingError {
    #[error("no valid pairing exists for this round ({unmatched} participants have already met everyone available)")]
    NoValidPairing { unmatched: usize },
}

/// A pair planned for the next round, numbered in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMatch {
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    pub match_number: i64,
    pub match_color: String,
}

/// Minimum present participants for unique pairings across `total_rounds`.
///
/// R participants suffice for R rounds when R is odd, R+1 when R is even.
pub fn min_participants(total_rounds: i64) -> usize {
    let rounds = total_rounds.max(0) as usize;
    if rounds % 2 == 0 {
        rounds + 1
    } else {
        rounds
    }
}

/// Normalize an unordered pair for set membership.
fn pair_key(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Build the pairs for one round.
///
/// Walks a seeded random permutation of `participants`; each still-unused
/// user is paired with the first later unused user they have not met. With
/// an odd count one participant sits out. If more than one participant is
/// left unmatched the round is unsatisfiable and nothing is emitted.
pub fn build_round(
    participants: &[Uuid],
    prior_pairs: &HashSet<(Uuid, Uuid)>,
    seed: u64,
) -> Result<Vec<PlannedMatch>, PairingError> {
    let mut shuffled = participants.to_vec();
    let mut rng = StdRng::seed_from_u64(seed);
    shuffled.shuffle(&mut rng);

    let mut used: HashSet<Uuid> = HashSet::new();
    let mut pairs: Vec<(Uuid, Uuid)> = Vec::new();

    for i in 0..shuffled.len() {
        let user1 = shuffled[i];
        if used.contains(&user1) {
            continue;
        }
        for &user2 in &shuffled[i + 1..] {
            if used.contains(&user2) {
                continue;
            }
            if prior_pairs.contains(&pair_key(user1, user2)) {
                continue;
            }
            pairs.push((user1, user2));
            used.insert(user1);
            used.insert(user2);
            break;
        }
    }

    let unmatched = shuffled.len() - used.len();
    if unmatched > 1 {
        return Err(PairingError::NoValidPairing { unmatched });
    }

    Ok(pairs
        .into_iter()
        .enumerate()
        .map(|(i, (user1_id, user2_id))| {
            let match_number = (i + 1) as i64;
            PlannedMatch {
                user1_id,
                user2_id,
                match_number,
                match_color: MATCH_COLORS[(match_number as usize) % MATCH_COLORS.len()]
                    .to_string(),
            }
        })
        .collect())
}
