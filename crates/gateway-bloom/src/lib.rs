//! Bloom filter negative cache (C5): remembers upstream 404s per route so
//! repeat lookups for the same missing resource can be short-circuited
//! without another round trip.

pub mod filter;
pub mod negative_cache;

pub use filter::{BloomError, BloomFilter};
pub use negative_cache::NegativeCacheManager;
