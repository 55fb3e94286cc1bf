//! Per-request protection verdicts.

use std::fmt;

use axum::http::StatusCode;

use crate::config::ProtectionPolicy;
use crate::kv::KvStore;
use crate::security::access_control::{AccessRules, RuleMatch};
use crate::security::rate_limit::{count_request, RateStatus};

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    DisallowIpv6,
    Ip,
    Subnet,
    Country,
    IpRateLimit,
    UaRateLimit,
    /// Raised by a ban hook.
    Plugin(String),
}

impl BlockReason {
    /// Rate limits answer 429, everything else 403.
    pub fn status(&self) -> StatusCode {
        match self {
            BlockReason::IpRateLimit | BlockReason::UaRateLimit => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::FORBIDDEN,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, BlockReason::IpRateLimit | BlockReason::UaRateLimit)
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::DisallowIpv6 => f.write_str("disallow-ipv6"),
            BlockReason::Ip => f.write_str("ip"),
            BlockReason::Subnet => f.write_str("subnet"),
            BlockReason::Country => f.write_str("country"),
            BlockReason::IpRateLimit => f.write_str("IPRateLimit"),
            BlockReason::UaRateLimit => f.write_str("UARateLimit"),
            BlockReason::Plugin(reason) => write!(f, "plugin-{}", reason),
        }
    }
}

impl From<RuleMatch> for BlockReason {
    fn from(m: RuleMatch) -> Self {
        match m {
            RuleMatch::DisallowIpv6 => BlockReason::DisallowIpv6,
            RuleMatch::Ip => BlockReason::Ip,
            RuleMatch::Subnet => BlockReason::Subnet,
            RuleMatch::Country => BlockReason::Country,
        }
    }
}

/// Whether a request may produce output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Decision {
    #[default]
    Allow,
    Block(BlockReason),
}

impl Decision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Decision::Block(_))
    }
}

/// Result of [`Protection::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    /// Present once the rate counters were consulted.
    pub rate: Option<RateStatus>,
}

impl Verdict {
    fn allow(rate: Option<RateStatus>) -> Self {
        Self {
            decision: Decision::Allow,
            rate,
        }
    }

    fn block(reason: BlockReason, rate: Option<RateStatus>) -> Self {
        Self {
            decision: Decision::Block(reason),
            rate,
        }
    }
}

/// A protection policy with its address rules parsed.
#[derive(Debug, Clone)]
pub struct Protection {
    policy: ProtectionPolicy,
    rules: AccessRules,
}

impl Protection {
    pub fn new(policy: ProtectionPolicy) -> Self {
        let rules = AccessRules::compile(&policy);
        Self { policy, rules }
    }

    pub fn policy(&self) -> &ProtectionPolicy {
        &self.policy
    }

    /// Run the checks in order. The first failing check decides.
    ///
    /// A failing store skips rate limiting for this request.
    pub async fn evaluate(
        &self,
        kv: &dyn KvStore,
        ip: &str,
        country: Option<&str>,
        user_agent: &str,
    ) -> Verdict {
        if !self.policy.is_enabled() {
            return Verdict::allow(None);
        }

        if let Some(hit) = self.rules.check(ip, country) {
            return Verdict::block(hit.into(), None);
        }

        let counts = match count_request(kv, ip, user_agent).await {
            Ok(counts) => counts,
            Err(e) => {
                tracing::warn!(ip = %ip, error = %e, "Rate counter unavailable, skipping rate limit");
                return Verdict::allow(None);
            }
        };

        let ip_limit = self.policy.ip_limit();
        let rate = Some(RateStatus::new(ip_limit, counts.ip));

        if counts.ip > ip_limit as i64 {
            return Verdict::block(BlockReason::IpRateLimit, rate);
        }
        if counts.user_agent > self.policy.user_agent_limit() as i64 {
            return Verdict::block(BlockReason::UaRateLimit, rate);
        }
        Verdict::allow(rate)
    }
}
