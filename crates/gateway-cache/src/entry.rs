use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs_f64()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Fresh,
    Stale,
    Miss,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    #[serde(with = "body_as_base64")]
    pub body: Vec<u8>,
    pub created_at: f64,
    pub ttl_seconds: u64,
    pub stale_seconds: u64,
    pub vary_key: String,
}

impl CacheEntry {
    pub fn new(
        status_code: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        ttl_seconds: u64,
        stale_seconds: u64,
        vary_key: String,
    ) -> Self {
        Self {
            status_code,
            headers,
            body,
            created_at: now_secs(),
            ttl_seconds,
            stale_seconds,
            vary_key,
        }
    }

    pub fn age_seconds(&self) -> f64 {
        now_secs() - self.created_at
    }

    pub fn status(&self) -> CacheStatus {
        let age = self.age_seconds();
        if age <= self.ttl_seconds as f64 {
            CacheStatus::Fresh
        } else if age <= (self.ttl_seconds + self.stale_seconds) as f64 {
            CacheStatus::Stale
        } else {
            CacheStatus::Miss
        }
    }

    pub fn total_ttl(&self) -> u64 {
        self.ttl_seconds + self.stale_seconds
    }
}

mod body_as_base64 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        String::from_utf8_lossy(body).into_owned().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Ok(String::deserialize(deserializer)?.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_within_ttl() {
        let entry = CacheEntry::new(200, vec![], b"hi".to_vec(), 300, 60, String::new());
        assert_eq!(entry.status(), CacheStatus::Fresh);
    }

    #[test]
    fn stale_between_ttl_and_stale_window() {
        let mut entry = CacheEntry::new(200, vec![], b"hi".to_vec(), 0, 60, String::new());
        entry.created_at = now_secs() - 10.0;
        assert_eq!(entry.status(), CacheStatus::Stale);
    }

    #[test]
    fn miss_past_the_stale_window() {
        let mut entry = CacheEntry::new(200, vec![], b"hi".to_vec(), 0, 1, String::new());
        entry.created_at = now_secs() - 10.0;
        assert_eq!(entry.status(), CacheStatus::Miss);
    }

    #[test]
    fn round_trips_through_json() {
        let entry = CacheEntry::new(
            200,
            vec![("content-type".to_string(), "text/plain".to_string())],
            b"payload".to_vec(),
            300,
            60,
            "accept-encoding:gzip".to_string(),
        );
        let json = serde_json::to_string(&entry).unwrap();
        let restored: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.body, entry.body);
        assert_eq!(restored.status_code, entry.status_code);
    }
}
