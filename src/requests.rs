use crate::codec::{AddressCodec, GlobalIndex, PackedRequest};
use crate::error::{HistoError, Result};

use clap::ValueEnum;
use rand::distributions::{Distribution, Uniform};
use rand::prelude::*;

/// Added to the rank id to seed each rank's generator.
pub const SEED_BASE: u64 = 120348;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestPattern {
    /// independent uniform indices over the whole table
    #[default]
    Uniform,
    /// `i % total_slots`, identical on every rank; handy when debugging
    Sequential,
}

/// One rank's workload: the raw global indices (replayed by verification)
/// and their packed form (consumed by the update loop).
#[derive(Debug, Clone)]
pub struct RequestList {
    codec: AddressCodec,
    indices: Vec<GlobalIndex>,
    packed: Vec<PackedRequest>,
}

impl RequestList {
    /// Builds a list from explicit indices, rejecting any outside the table.
    pub fn from_indices(codec: AddressCodec, indices: Vec<GlobalIndex>) -> Result<Self> {
        if let Some(bad) = indices.iter().find(|&&g| g >= codec.total_slots()) {
            return Err(HistoError::Configuration(format!(
                "request index {bad} outside table of {} slots",
                codec.total_slots()
            )));
        }
        let packed = indices.iter().map(|&g| codec.encode(g)).collect();
        Ok(RequestList {
            codec,
            indices,
            packed,
        })
    }

    pub fn codec(&self) -> &AddressCodec {
        &self.codec
    }

    pub fn indices(&self) -> &[GlobalIndex] {
        &self.indices
    }

    pub fn packed(&self) -> &[PackedRequest] {
        &self.packed
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

pub struct RequestGenerator {
    codec: AddressCodec,
    pattern: RequestPattern,
    rng: StdRng,
}

impl RequestGenerator {
    pub fn for_rank(codec: AddressCodec, rank: usize, seed_base: u64) -> Self {
        Self::with_seed(codec, seed_base.wrapping_add(rank as u64))
    }

    pub fn with_seed(codec: AddressCodec, seed: u64) -> Self {
        RequestGenerator {
            codec,
            pattern: RequestPattern::Uniform,
            rng: SeedableRng::seed_from_u64(seed),
        }
    }

    pub fn pattern(mut self, pattern: RequestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn generate(&mut self, count: usize) -> RequestList {
        let total_slots = self.codec.total_slots();
        let indices: Vec<GlobalIndex> = match self.pattern {
            RequestPattern::Uniform => {
                let range = Uniform::new(0, total_slots);
                range.sample_iter(&mut self.rng).take(count).collect()
            }
            RequestPattern::Sequential => (0..count as u64).map(|i| i % total_slots).collect(),
        };
        let packed = indices.iter().map(|&g| self.codec.encode(g)).collect();
        RequestList {
            codec: self.codec,
            indices,
            packed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> AddressCodec {
        AddressCodec::new(4, 250).unwrap()
    }

    #[test]
    fn same_seed_same_requests() {
        let a = RequestGenerator::for_rank(codec(), 3, SEED_BASE).generate(500);
        let b = RequestGenerator::for_rank(codec(), 3, SEED_BASE).generate(500);
        assert_eq!(a.indices(), b.indices());
        assert_eq!(a.packed(), b.packed());
    }

    #[test]
    fn ranks_get_different_streams() {
        let a = RequestGenerator::for_rank(codec(), 0, SEED_BASE).generate(500);
        let b = RequestGenerator::for_rank(codec(), 1, SEED_BASE).generate(500);
        assert_ne!(a.indices(), b.indices());
    }

    #[test]
    fn packed_matches_indices() {
        let codec = codec();
        let list = RequestGenerator::for_rank(codec, 2, SEED_BASE).generate(10_000);
        assert_eq!(list.len(), 10_000);
        for (&g, &p) in list.indices().iter().zip(list.packed()) {
            assert!(g < codec.total_slots());
            assert_eq!(p.decode(), codec.split(g));
        }
    }

    #[test]
    fn uniform_touches_every_rank() {
        let list = RequestGenerator::for_rank(codec(), 0, SEED_BASE).generate(10_000);
        let mut seen = [false; 4];
        for p in list.packed() {
            seen[p.rank()] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn sequential_wraps_table() {
        let codec = AddressCodec::new(2, 3).unwrap();
        let list = RequestGenerator::for_rank(codec, 1, SEED_BASE)
            .pattern(RequestPattern::Sequential)
            .generate(8);
        assert_eq!(list.indices(), &[0, 1, 2, 3, 4, 5, 0, 1]);
    }

    #[test]
    fn zero_requests_is_empty() {
        let list = RequestGenerator::for_rank(codec(), 0, SEED_BASE).generate(0);
        assert!(list.is_empty());
        assert!(list.packed().is_empty());
    }

    #[test]
    fn from_indices_rejects_out_of_range() {
        let codec = AddressCodec::new(2, 4).unwrap();
        assert!(RequestList::from_indices(codec, vec![0, 7]).is_ok());
        assert!(matches!(
            RequestList::from_indices(codec, vec![0, 8]),
            Err(HistoError::Configuration(_))
        ));
    }
}
