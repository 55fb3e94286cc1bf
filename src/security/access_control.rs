//! Address and country rules of a protection policy.

use std::net::IpAddr;

use ipnet::IpNet;

use crate::config::ProtectionPolicy;

/// One `blockedIP` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpRule {
    Addr(IpAddr),
    Subnet(IpNet),
}

/// Parse an address or CIDR subnet. Returns `None` for anything else.
pub fn parse_ip_rule(entry: &str) -> Option<IpRule> {
    let entry = entry.trim();
    if entry.contains('/') {
        entry.parse::<IpNet>().ok().map(IpRule::Subnet)
    } else {
        entry.parse::<IpAddr>().ok().map(IpRule::Addr)
    }
}

/// Non-counting part of a policy, parsed once per domain.
#[derive(Debug, Clone, Default)]
pub struct AccessRules {
    blocked_literals: Vec<String>,
    blocked_subnets: Vec<IpNet>,
    allowed_ip: Vec<String>,
    blocked_country: Vec<String>,
    allowed_country: Option<Vec<String>>,
    disallow_ipv6: bool,
}

/// Outcome of the address/country rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMatch {
    DisallowIpv6,
    Ip,
    Subnet,
    Country,
}

impl AccessRules {
    pub fn compile(policy: &ProtectionPolicy) -> Self {
        let mut blocked_subnets = Vec::new();
        for entry in &policy.blocked_ip {
            match parse_ip_rule(entry) {
                Some(IpRule::Subnet(net)) => blocked_subnets.push(net),
                Some(IpRule::Addr(_)) => {}
                None => tracing::warn!(entry = %entry, "Ignoring unparsable blockedIP entry"),
            }
        }

        Self {
            blocked_literals: policy.blocked_ip.iter().map(|s| s.trim().to_string()).collect(),
            blocked_subnets,
            allowed_ip: policy.allowed_ip.clone(),
            blocked_country: policy.blocked_country.clone(),
            allowed_country: policy.allowed_country.clone(),
            disallow_ipv6: policy.disallow_ipv6,
        }
    }

    /// Apply the rules in order; the first hit wins.
    pub fn check(&self, ip: &str, country: Option<&str>) -> Option<RuleMatch> {
        if self.disallow_ipv6 && ip.contains(':') {
            return Some(RuleMatch::DisallowIpv6);
        }
        if self.blocked_literals.iter().any(|b| b == ip) {
            return Some(RuleMatch::Ip);
        }
        if !self.blocked_subnets.is_empty() {
            if let Ok(addr) = ip.parse::<IpAddr>() {
                if self.blocked_subnets.iter().any(|net| net.contains(&addr)) {
                    return Some(RuleMatch::Subnet);
                }
            }
        }
        if let Some(country) = country.filter(|c| !c.is_empty()) {
            if !self.allowed_ip.iter().any(|a| a == ip) {
                let blocked = self.blocked_country.iter().any(|c| c == country);
                let not_allowed = match &self.allowed_country {
                    Some(allowed) if !allowed.is_empty() => !allowed.iter().any(|c| c == country),
                    _ => false,
                };
                if blocked || not_allowed {
                    return Some(RuleMatch::Country);
                }
            }
        }
        None
    }
}
