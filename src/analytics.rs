//! Request statistics kept in the KV store.
//!
//! Day counters live 25 hours, week counters 8 days. A day whose count
//! exceeds the mean plus two standard deviations of the recent days is
//! reported as a traffic anomaly.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Utc};

use crate::events::Extensions;
use crate::kv::{KvError, KvStore};

const DAY_TTL_SECS: i64 = 60 * 60 * 25;
const WEEK_TTL_SECS: i64 = 60 * 60 * 24 * 8;

pub fn day_key(at: DateTime<Utc>) -> String {
    format!("stats:requests:day:{}", at.format("%Y-%m-%d"))
}

/// Week number counts whole weeks since January 1st, starting at 1.
pub fn week_key(at: DateTime<Utc>) -> String {
    format!("stats:requests:week:{}-{}", at.year(), at.ordinal0() / 7 + 1)
}

/// Mean and population standard deviation.
pub fn mean_std_dev(data: &[u64]) -> (f64, f64) {
    if data.is_empty() {
        return (0.0, 0.0);
    }
    let n = data.len() as f64;
    let mean = data.iter().sum::<u64>() as f64 / n;
    let variance = data
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean, variance.sqrt())
}

#[derive(Clone)]
pub struct RequestCounters {
    kv: Arc<dyn KvStore>,
}

impl RequestCounters {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn record(&self, at: DateTime<Utc>) -> Result<(), KvError> {
        let day = day_key(at);
        self.kv.incr(&day).await?;
        self.kv.expire(&day, DAY_TTL_SECS).await?;

        let week = week_key(at);
        self.kv.incr(&week).await?;
        self.kv.expire(&week, WEEK_TTL_SECS).await?;
        Ok(())
    }

    /// Counts for `days` days ending at `at`, most recent first.
    pub async fn daily(&self, at: DateTime<Utc>, days: u32) -> Result<Vec<u64>, KvError> {
        let mut counts = Vec::with_capacity(days as usize);
        for offset in 0..days {
            let key = day_key(at - Duration::days(i64::from(offset)));
            let count = self
                .kv
                .get(&key)
                .await?
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0);
            counts.push(count);
        }
        Ok(counts)
    }

    /// `mean + 2σ` over the last `days` days; `None` with fewer than three days.
    pub async fn anomaly_threshold(&self, at: DateTime<Utc>, days: u32) -> Result<Option<f64>, KvError> {
        if days < 3 {
            return Ok(None);
        }
        let (mean, std_dev) = mean_std_dev(&self.daily(at, days).await?);
        Ok(Some(mean + 2.0 * std_dev))
    }

    /// Compare today's count with the recent threshold and warn when above it.
    pub async fn check_anomaly(&self, at: DateTime<Utc>) -> Result<bool, KvError> {
        let Some(threshold) = self.anomaly_threshold(at, 4).await? else {
            return Ok(false);
        };
        let today = self
            .kv
            .get(&day_key(at))
            .await?
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let anomalous = today as f64 > threshold;
        if anomalous {
            tracing::warn!(today, threshold, "Request volume above anomaly threshold");
        }
        Ok(anomalous)
    }

    /// Register as the analytics extension. Counting happens off the request path.
    pub fn install(&self, extensions: &Extensions) -> bool {
        let counters = self.clone();
        extensions.on_analytics(move |_ip, _headers| {
            let counters = counters.clone();
            tokio::spawn(async move {
                if let Err(e) = counters.record(Utc::now()).await {
                    tracing::debug!(error = %e, "Failed to record request statistics");
                }
            });
        })
    }
}
