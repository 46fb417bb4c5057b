//! Per-route bloom filter (§4.5): sizing from `(expected_items, fp_rate)`,
//! double hashing with MurmurHash3, bits stored via the coordination
//! store's bitmap ops so the filter is shared across replicas.

use gateway_store::{Store, StoreError};
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BloomError {
    #[error("coordination store error: {0}")]
    Store(#[from] StoreError),
}

/// `m = ceil(-n * ln(p) / ln(2)^2)`
fn optimal_bits(expected_items: u64, fp_rate: f64) -> u64 {
    let n = expected_items.max(1) as f64;
    (-n * fp_rate.ln() / (std::f64::consts::LN_2 * std::f64::consts::LN_2)).ceil() as u64
}

/// `k = max(1, ceil((m / n) * ln(2)))`
fn optimal_hashes(bits: u64, expected_items: u64) -> u32 {
    let n = expected_items.max(1) as f64;
    (((bits as f64 / n) * std::f64::consts::LN_2).ceil() as u32).max(1)
}

fn murmur_hash(item: &str, seed: u32) -> u32 {
    murmur3::murmur3_32(&mut Cursor::new(item.as_bytes()), seed).unwrap_or(0)
}

/// The `k` bit positions `(h1 + i*h2) mod m` for `i in [0, k)` (§4.5).
fn bit_positions(item: &str, bits: u64, hashes: u32) -> Vec<u64> {
    let h1 = murmur_hash(item, 0);
    let h2 = murmur_hash(item, h1);
    (0..hashes)
        .map(|i| (h1 as u64).wrapping_add((i as u64).wrapping_mul(h2 as u64)) % bits)
        .collect()
}

pub struct BloomFilter {
    store: Arc<dyn Store>,
    key: String,
    bits: u64,
    hashes: u32,
}

impl BloomFilter {
    pub fn new(store: Arc<dyn Store>, route_name: &str, expected_items: u64, fp_rate: f64) -> Self {
        let bits = optimal_bits(expected_items, fp_rate);
        let hashes = optimal_hashes(bits, expected_items);
        Self {
            store,
            key: format!("bloom:404:{route_name}"),
            bits,
            hashes,
        }
    }

    pub async fn add(&self, item: &str) -> Result<(), BloomError> {
        for position in bit_positions(item, self.bits, self.hashes) {
            self.store.setbit(&self.key, position, true).await?;
        }
        Ok(())
    }

    /// `false` if any bit is unset, `true` otherwise. No false negatives:
    /// once `add` has run, `contains` is true until `clear`.
    pub async fn contains(&self, item: &str) -> Result<bool, BloomError> {
        for position in bit_positions(item, self.bits, self.hashes) {
            if !self.store.getbit(&self.key, position).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub async fn clear(&self) -> Result<(), BloomError> {
        self.store.delete(&self.key).await?;
        Ok(())
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }

    pub fn hash_count(&self) -> u32 {
        self.hashes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_store::MemoryStore;
    use proptest::prelude::*;

    #[test]
    fn sizing_formulas_match_the_spec() {
        // n=10000, p=0.01 is the documented default; a reasonable production
        // sizing should land well under a megabit.
        let bits = optimal_bits(10_000, 0.01);
        let hashes = optimal_hashes(bits, 10_000);
        assert!(bits > 0);
        assert!(hashes >= 1);
    }

    #[tokio::test]
    async fn added_item_is_always_contained() {
        let filter = BloomFilter::new(Arc::new(MemoryStore::new()), "route", 1000, 0.01);
        filter.add("/items/99").await.unwrap();
        assert!(filter.contains("/items/99").await.unwrap());
    }

    #[tokio::test]
    async fn unrelated_item_is_usually_absent() {
        let filter = BloomFilter::new(Arc::new(MemoryStore::new()), "route", 1000, 0.01);
        filter.add("/items/99").await.unwrap();
        assert!(!filter.contains("/other/path").await.unwrap());
    }

    #[tokio::test]
    async fn clear_resets_the_filter() {
        let filter = BloomFilter::new(Arc::new(MemoryStore::new()), "route", 1000, 0.01);
        filter.add("/items/99").await.unwrap();
        filter.clear().await.unwrap();
        assert!(!filter.contains("/items/99").await.unwrap());
    }

    proptest! {
        #[test]
        fn bit_positions_are_deterministic_and_in_range(item in "[a-z/]{1,32}") {
            let bits = optimal_bits(1000, 0.01);
            let hashes = optimal_hashes(bits, 1000);
            let first = bit_positions(&item, bits, hashes);
            let second = bit_positions(&item, bits, hashes);
            prop_assert_eq!(&first, &second);
            prop_assert!(first.iter().all(|&p| p < bits));
        }
    }
}
