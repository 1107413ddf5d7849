//! Request rule sets
//!
//! A [`RuleSet`] decides whether a parsed request may proceed. The built-in
//! variants cover the common cases with branch-predictable dispatch; the
//! `Custom` variant is the escape hatch for user-supplied logic.

use crate::socks::Request;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// User-supplied rule logic for [`RuleSet::Custom`].
pub trait Rule: Send + Sync {
    /// Whether the request may proceed.
    fn allow(&self, req: &Request) -> bool;
}

/// A boolean predicate over a parsed request.
#[derive(Clone, Default)]
pub enum RuleSet {
    /// Allow every request
    #[default]
    PermitAll,
    /// Deny every request
    PermitNone,
    /// Allow when the destination FQDN matches the pattern
    DestPattern(Regex),
    /// Allow only destinations given as a domain name, not an IP literal
    RequireFqdn,
    /// Allow iff every member allows; an empty chain allows
    Chain(Vec<RuleSet>),
    /// Delegate to user-supplied logic
    Custom(Arc<dyn Rule>),
}

impl RuleSet {
    /// Build a [`RuleSet::DestPattern`] from a regex pattern string.
    pub fn dest_pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(RuleSet::DestPattern(Regex::new(pattern)?))
    }

    /// Evaluate this rule set against a request.
    pub fn allow(&self, req: &Request) -> bool {
        match self {
            RuleSet::PermitAll => true,
            RuleSet::PermitNone => false,
            RuleSet::DestPattern(pattern) => {
                pattern.is_match(req.dest.fqdn.as_deref().unwrap_or(""))
            }
            RuleSet::RequireFqdn => req.dest.fqdn.is_some(),
            RuleSet::Chain(members) => members.iter().all(|member| member.allow(req)),
            RuleSet::Custom(rule) => rule.allow(req),
        }
    }
}

impl fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleSet::PermitAll => write!(f, "PermitAll"),
            RuleSet::PermitNone => write!(f, "PermitNone"),
            RuleSet::DestPattern(pattern) => write!(f, "DestPattern({})", pattern.as_str()),
            RuleSet::RequireFqdn => write!(f, "RequireFqdn"),
            RuleSet::Chain(members) => f.debug_tuple("Chain").field(members).finish(),
            RuleSet::Custom(_) => write!(f, "Custom"),
        }
    }
}
