use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rand::RngCore;
use uuid::Uuid;

/// A pending session token.
struct TokenEntry {
    user_id: Uuid,
    expires_at: Instant,
}

#[derive(Default)]
struct TokenIndex {
    by_token: HashMap<String, TokenEntry>,
    by_user: HashMap<Uuid, HashSet<String>>,
    /// Last known display name per user.
    names: HashMap<Uuid, String>,
}

impl TokenIndex {
    fn unlink(&mut self, user_id: Uuid, token: &str) {
        if let Some(tokens) = self.by_user.get_mut(&user_id) {
            tokens.remove(token);
            if tokens.is_empty() {
                self.by_user.remove(&user_id);
            }
        }
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<(String, Uuid)> = self
            .by_token
            .iter()
            .filter(|(_, entry)| entry.expires_at < now)
            .map(|(token, entry)| (token.clone(), entry.user_id))
            .collect();
        for (token, user_id) in &expired {
            self.by_token.remove(token);
            self.unlink(*user_id, token);
        }
        expired.len()
    }
}

/// Issues and redeems single-use session tokens.
///
/// Both indices live behind one lock so a token is never visible in one and
/// missing from the other. Re-issuing a token for a user leaves that user's
/// earlier tokens valid.
#[derive(Default)]
pub struct TokenStore {
    inner: Mutex<TokenIndex>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TokenIndex> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Generate 128 random bits rendered as 32 hex characters.
    fn generate_token() -> String {
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Mint a token for `user_id` valid for `ttl`. Expired tokens are swept
    /// before the new one is stored.
    pub fn create_token(&self, user_id: Uuid, ttl: Duration) -> String {
        let now = Instant::now();
        let mut index = self.lock();
        let purged = index.purge_expired(now);
        if purged > 0 {
            tracing::debug!(purged, "Purged expired session tokens");
        }

        let mut token = Self::generate_token();
        while index.by_token.contains_key(&token) {
            token = Self::generate_token();
        }
        index.by_token.insert(
            token.clone(),
            TokenEntry {
                user_id,
                expires_at: now + ttl,
            },
        );
        index
            .by_user
            .entry(user_id)
            .or_default()
            .insert(token.clone());
        token
    }

    /// Redeem a token. Returns the bound user only if the token existed and
    /// had not expired; either way the token is gone afterwards.
    pub fn consume_token_for_user(&self, token: Option<&str>) -> Option<Uuid> {
        let token = token.filter(|t| !t.trim().is_empty())?;
        let mut index = self.lock();
        let entry = index.by_token.remove(token)?;
        index.unlink(entry.user_id, token);
        drop(index);

        (entry.expires_at >= Instant::now()).then_some(entry.user_id)
    }

    /// Remember the display name shown to peers for `user_id`.
    pub fn remember_name(&self, user_id: Uuid, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        self.lock().names.insert(user_id, name.to_string());
    }

    pub fn user_name(&self, user_id: Uuid) -> Option<String> {
        self.lock().names.get(&user_id).cloned()
    }

    /// Number of tokens currently stored (expired ones included until swept).
    pub fn outstanding(&self) -> usize {
        self.lock().by_token.len()
    }

    pub fn outstanding_for(&self, user_id: Uuid) -> usize {
        self.lock().by_user.get(&user_id).map_or(0, HashSet::len)
    }
}
