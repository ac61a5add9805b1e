use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Override,
    ManageSlides,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Override => "override",
            Capability::ManageSlides => "manage_slides",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn can(&self, capability: Capability) -> bool {
        self.roles
            .iter()
            .any(|role| role == "admin" || role == capability.as_str())
    }

    pub fn require(&self, capability: Capability) -> SyncResult<()> {
        if self.can(capability) {
            Ok(())
        } else {
            Err(SyncError::PermissionDenied)
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenConfigError {
    #[error("token entry `{0}` must look like `<sha256>=<user>:<role>+<role>`")]
    Malformed(String),
    #[error("token digest `{0}` is not 64 hex characters")]
    BadDigest(String),
}

/// Hex SHA-256 of a raw token, the form tokens are configured in.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Maps token digests to principals. Raw tokens never sit in memory.
#[derive(Debug, Clone, Default)]
pub struct TokenAuthority {
    principals: HashMap<String, Principal>,
}

impl TokenAuthority {
    /// Parse `digest=user:role+role,digest=user:role`.
    pub fn parse(entries: &str) -> Result<Self, TokenConfigError> {
        let mut principals = HashMap::new();
        for entry in entries.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (digest, principal) = entry
                .split_once('=')
                .ok_or_else(|| TokenConfigError::Malformed(entry.to_string()))?;
            let digest = digest.trim().to_ascii_lowercase();
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(TokenConfigError::BadDigest(digest));
            }
            let (user_id, roles) = principal
                .split_once(':')
                .ok_or_else(|| TokenConfigError::Malformed(entry.to_string()))?;
            if user_id.trim().is_empty() {
                return Err(TokenConfigError::Malformed(entry.to_string()));
            }
            principals.insert(
                digest,
                Principal {
                    user_id: user_id.trim().to_string(),
                    roles: roles
                        .split('+')
                        .map(str::trim)
                        .filter(|r| !r.is_empty())
                        .map(str::to_string)
                        .collect(),
                },
            );
        }
        Ok(Self { principals })
    }

    pub fn insert(&mut self, token: &str, principal: Principal) {
        self.principals.insert(hash_token(token), principal);
    }

    pub fn authenticate(&self, token: &str) -> Option<Principal> {
        self.principals.get(&hash_token(token)).cloned()
    }

    pub fn len(&self) -> usize {
        self.principals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }
}
