//! Connection policy
//!
//! Two independent gates: a [`ClientFilter`] on the peer IP, evaluated
//! before any protocol bytes are read, and a [`RuleSet`] over the parsed
//! request, evaluated before dispatch.

mod filter;
mod rules;

pub use filter::{AllowAll, CidrFilter, ClientFilter};
pub use rules::{Rule, RuleSet};
