//! Fixed-window request counters kept in the key-value store.

use crate::kv::{KvError, KvStore};

/// Window of the per-IP counter.
pub const IP_WINDOW_SECS: i64 = 1800;
/// Window of the per-User-Agent counter.
pub const UA_WINDOW_SECS: i64 = 900;

pub fn ip_key(ip: &str) -> String {
    format!("{}[RateLimitIP]", ip)
}

pub fn user_agent_key(user_agent: &str) -> String {
    format!("{}[RateLimitUserAgent]", user_agent)
}

/// Counts after incrementing both windows for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateCounts {
    pub ip: i64,
    pub user_agent: i64,
}

/// Values for the `X-RateLimit-*` response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateStatus {
    pub limit: u64,
    pub remaining: u64,
}

impl RateStatus {
    pub fn new(limit: u64, ip_count: i64) -> Self {
        let used = u64::try_from(ip_count).unwrap_or(0);
        Self {
            limit,
            remaining: limit.saturating_sub(used),
        }
    }
}

/// Increment one counter; its expiry is only set when the window opens.
async fn bump(kv: &dyn KvStore, key: &str, window: i64) -> Result<i64, KvError> {
    let count = kv.incr(key).await?;
    if count == 1 {
        kv.expire(key, window).await?;
    }
    Ok(count)
}

/// Count one request against the IP and User-Agent windows.
pub async fn count_request(kv: &dyn KvStore, ip: &str, user_agent: &str) -> Result<RateCounts, KvError> {
    let ip_count = bump(kv, &ip_key(ip), IP_WINDOW_SECS).await?;
    let ua_count = bump(kv, &user_agent_key(user_agent), UA_WINDOW_SECS).await?;
    Ok(RateCounts {
        ip: ip_count,
        user_agent: ua_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    #[tokio::test]
    async fn test_counts_accumulate() {
        let kv = MemoryStore::new(None);
        for n in 1..=3 {
            let counts = count_request(&kv, "1.2.3.4", "curl").await.unwrap();
            assert_eq!(counts.ip, n);
            assert_eq!(counts.user_agent, n);
        }
        let other = count_request(&kv, "5.6.7.8", "curl").await.unwrap();
        assert_eq!(other.ip, 1);
        assert_eq!(other.user_agent, 4);
    }

    #[tokio::test]
    async fn test_window_is_fixed() {
        let kv = MemoryStore::new(None);
        count_request(&kv, "1.2.3.4", "ua").await.unwrap();
        kv.expire(&ip_key("1.2.3.4"), 1).await.unwrap();
        // A later increment must not push the expiry back.
        count_request(&kv, "1.2.3.4", "ua").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let counts = count_request(&kv, "1.2.3.4", "ua").await.unwrap();
        assert_eq!(counts.ip, 1);
        assert_eq!(counts.user_agent, 3);
    }

    #[test]
    fn test_remaining_saturates() {
        assert_eq!(RateStatus::new(3, 1).remaining, 2);
        assert_eq!(RateStatus::new(3, 7).remaining, 0);
    }
}
