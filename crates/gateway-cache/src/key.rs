//! Canonical cache key construction (§4.8). Identical semantic requests —
//! regardless of query parameter or vary-header ordering — must hash to the
//! same key.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    /// `query_params` maps a parameter name to all of its values (a repeated
    /// `?tag=a&tag=b` query string collapses to one entry with two values).
    pub fn build(
        method: &str,
        route_name: &str,
        path: &str,
        query_params: &BTreeMap<String, Vec<String>>,
        vary_headers: &BTreeMap<String, String>,
        tenant_id: Option<&str>,
    ) -> String {
        let normalized_query = {
            let mut pairs: Vec<(String, String)> = Vec::new();
            for (k, values) in query_params {
                let mut sorted_values = values.clone();
                sorted_values.sort();
                for v in sorted_values {
                    pairs.push((k.clone(), v));
                }
            }
            pairs
                .into_iter()
                .map(|(k, v)| format!("{}={}", urlencode(&k), urlencode(&v)))
                .collect::<Vec<_>>()
                .join("&")
        };

        let vary_key = vary_headers
            .iter()
            .map(|(k, v)| format!("{}:{}", k.to_lowercase(), v))
            .collect::<Vec<_>>()
            .join("|");

        let mut components = vec![
            method.to_uppercase(),
            route_name.to_string(),
            path.to_string(),
            normalized_query,
            vary_key,
        ];
        if let Some(tenant_id) = tenant_id {
            components.insert(0, tenant_id.to_string());
        }

        let raw_key = components.join("::");
        let digest = Sha256::digest(raw_key.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        format!("cache:{}", &hex[..32])
    }

    pub fn lock_key(cache_key: &str) -> String {
        format!("lock:{cache_key}")
    }
}

fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn key_is_independent_of_query_param_order() {
        let a = params(&[("b", &["2"]), ("a", &["1"])]);
        let b = params(&[("a", &["1"]), ("b", &["2"])]);
        let vary = BTreeMap::new();
        let key_a = CacheKeyBuilder::build("GET", "route", "/p", &a, &vary, None);
        let key_b = CacheKeyBuilder::build("GET", "route", "/p", &b, &vary, None);
        assert_eq!(key_a, key_b);
    }

    #[test]
    fn key_is_independent_of_repeated_value_order() {
        let a = params(&[("tag", &["b", "a"])]);
        let b = params(&[("tag", &["a", "b"])]);
        let vary = BTreeMap::new();
        let key_a = CacheKeyBuilder::build("GET", "route", "/p", &a, &vary, None);
        let key_b = CacheKeyBuilder::build("GET", "route", "/p", &b, &vary, None);
        assert_eq!(key_a, key_b);
    }

    #[test]
    fn different_tenants_do_not_collide() {
        let empty = BTreeMap::new();
        let key_a = CacheKeyBuilder::build("GET", "route", "/p", &empty, &empty, Some("tenant-a"));
        let key_b = CacheKeyBuilder::build("GET", "route", "/p", &empty, &empty, Some("tenant-b"));
        assert_ne!(key_a, key_b);
    }

    #[test]
    fn key_has_the_cache_prefix_and_fixed_length() {
        let empty = BTreeMap::new();
        let key = CacheKeyBuilder::build("GET", "route", "/p", &empty, &empty, None);
        assert!(key.starts_with("cache:"));
        assert_eq!(key.len(), "cache:".len() + 32);
    }
}
