//! Per-request audit and scoping context.
//!
//! A [`RequestContext`] is built once when a request enters the system and is
//! handed by reference to every service call that may write an audit entry or
//! scope data. There is no ambient or thread-local copy.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use uuid::Uuid;

use crate::domain::{AccountId, UnitId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub actor: Option<AccountId>,
    pub client_ip: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub unit: Option<UnitId>,
    pub timestamp: DateTime<Utc>,
}

impl RequestContext {
    #[must_use]
    pub fn new(client_ip: Option<IpAddr>, user_agent: Option<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            actor: None,
            client_ip,
            user_agent,
            unit: None,
            timestamp: Utc::now(),
        }
    }

    /// Context for operator tooling that runs outside any HTTP request.
    #[must_use]
    pub fn system(agent: &str) -> Self {
        Self::new(None, Some(agent.to_string()))
    }

    #[must_use]
    pub const fn with_actor(mut self, actor: AccountId) -> Self {
        self.actor = Some(actor);
        self
    }

    #[must_use]
    pub const fn with_unit(mut self, unit: Option<UnitId>) -> Self {
        self.unit = unit;
        self
    }

    /// Pins the clock used by lockout and expiry decisions.
    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn ip_string(&self) -> Option<String> {
        self.client_ip.map(|ip| ip.to_string())
    }

    #[must_use]
    pub fn user_agent_hash(&self) -> String {
        hash_user_agent(self.user_agent.as_deref().unwrap_or_default())
    }
}

#[must_use]
pub fn hash_user_agent(user_agent: &str) -> String {
    hex::encode(Sha256::digest(user_agent.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let actor = AccountId::generate();
        let unit = UnitId::generate();
        let ctx = RequestContext::new(Some("10.0.0.7".parse().unwrap()), Some("curl/8".into()))
            .with_actor(actor)
            .with_unit(Some(unit));

        assert_eq!(ctx.actor, Some(actor));
        assert_eq!(ctx.unit, Some(unit));
        assert_eq!(ctx.ip_string().as_deref(), Some("10.0.0.7"));
        assert_eq!(ctx.user_agent_hash(), hash_user_agent("curl/8"));
        assert_eq!(ctx.user_agent_hash().len(), 64);
    }

    #[test]
    fn test_system_context_has_no_actor() {
        let ctx = RequestContext::system("centergate-cli");
        assert!(ctx.actor.is_none());
        assert!(ctx.client_ip.is_none());
        assert_eq!(ctx.user_agent.as_deref(), Some("centergate-cli"));
    }
}
