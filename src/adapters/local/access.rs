//! Token-list `AccessGate` configured from the environment.

use crate::ports::access::{AccessGate, Principal};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct StaticTokenGate {
    admins: HashSet<String>,
    subscribers: HashSet<String>,
}

impl StaticTokenGate {
    pub fn new<A, S>(admin_tokens: A, subscriber_tokens: S) -> Self
    where
        A: IntoIterator<Item = String>,
        S: IntoIterator<Item = String>,
    {
        Self {
            admins: admin_tokens.into_iter().filter(|t| !t.is_empty()).collect(),
            subscribers: subscriber_tokens
                .into_iter()
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }
}

/// Tokens are never logged or used as ids verbatim.
fn principal_id(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("token-{}", hex::encode(&digest[..8]))
}

impl AccessGate for StaticTokenGate {
    fn resolve(&self, bearer: Option<&str>) -> Principal {
        match bearer {
            Some(token) if self.admins.contains(token) => Principal::Admin {
                id: principal_id(token),
            },
            Some(token) if self.subscribers.contains(token) => Principal::Subscriber {
                id: principal_id(token),
            },
            _ => Principal::Anonymous,
        }
    }
}
