//! Labelled chunk plans for parity runs: the deterministic set plus seeded
//! random splits that can be replayed from the printed seed.

use crate::test_harness::{
    BoundaryPolicy, ChunkPlan, deterministic_chunk_plans, filter_boundaries_by_policy,
    semantic_boundaries,
};

#[derive(Clone, Debug)]
pub struct ChunkPlanCase {
    pub label: String,
    pub plan: ChunkPlan,
}

/// Deterministic plans followed by `fuzz_runs` seeded plans.
///
/// Odd runs split at random byte offsets (possibly inside UTF-8 sequences),
/// even runs draw from the marker-adjacent offsets only.
pub fn build_chunk_plans(input: &str, fuzz_runs: usize, fuzz_seed: u64) -> Vec<ChunkPlanCase> {
    let mut cases: Vec<ChunkPlanCase> = deterministic_chunk_plans(input)
        .into_iter()
        .map(|plan| ChunkPlanCase {
            label: plan.to_string(),
            plan,
        })
        .collect();
    if input.len() < 2 {
        return cases;
    }
    let semantic = semantic_boundaries(input);
    for run in 0..fuzz_runs {
        let seed = fuzz_seed.wrapping_add(run as u64);
        let plan = if run % 2 == 1 || semantic.is_empty() {
            random_byte_plan(input, seed)
        } else {
            random_pick_plan(&semantic, seed)
        };
        cases.push(ChunkPlanCase {
            label: format!("fuzz seed=0x{seed:016x} {plan}"),
            plan,
        });
    }
    cases
}

/// Random chunk sizes between 1 and 16 bytes.
pub fn random_byte_plan(input: &str, seed: u64) -> ChunkPlan {
    let mut rng = Lcg::new(seed);
    let mut sizes = Vec::new();
    let mut covered = 0usize;
    while covered < input.len() {
        let size = 1 + rng.gen_range(16);
        sizes.push(size);
        covered += size;
    }
    ChunkPlan::Sizes {
        sizes,
        policy: BoundaryPolicy::ByteStream,
    }
}

fn random_pick_plan(candidates: &[usize], seed: u64) -> ChunkPlan {
    let mut rng = Lcg::new(seed);
    let mut picks = candidates.to_vec();
    rng.shuffle(&mut picks);
    let count = 1 + rng.gen_range(picks.len().clamp(1, 24));
    picks.truncate(count);
    picks.sort_unstable();
    picks.dedup();
    ChunkPlan::boundaries(picks)
}

/// Every char boundary inside `input`.
pub fn utf8_internal_boundaries(input: &str) -> Vec<usize> {
    let indices: Vec<usize> = input.char_indices().map(|(idx, _)| idx).collect();
    filter_boundaries_by_policy(input, &indices, BoundaryPolicy::Utf8Aligned)
}

struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.state
    }

    fn gen_range(&mut self, upper: usize) -> usize {
        if upper == 0 {
            return 0;
        }
        (self.next_u64() >> 32) as usize % upper
    }

    fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.gen_range(i + 1);
            items.swap(i, j);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuzz_plans_are_reproducible() {
        let input = "<a href=\"x\">&amp;</a> tail";
        let first = build_chunk_plans(input, 6, 0xfeed);
        let second = build_chunk_plans(input, 6, 0xfeed);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.label, b.label);
            assert_eq!(a.plan, b.plan);
        }
    }

    #[test]
    fn random_sizes_cover_input() {
        let input = "x".repeat(100);
        let ChunkPlan::Sizes { sizes, .. } = random_byte_plan(&input, 7) else {
            panic!("expected sizes plan");
        };
        assert!(sizes.iter().sum::<usize>() >= input.len());
        assert!(sizes.iter().all(|&size| (1..=16).contains(&size)));
    }

    #[test]
    fn internal_boundaries_skip_multibyte_interiors() {
        assert_eq!(utf8_internal_boundaries("aéb"), vec![1, 3]);
    }
}
