//! Per-user serialization of token writes
//!
//! Token writes replace a user's whole collection, so two writers for the
//! same user must not interleave their read and write. Users are hashed onto
//! a fixed set of async mutexes.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokio::sync::{Mutex, MutexGuard};

/// Fixed pool of lock stripes keyed by user id
#[derive(Debug)]
pub struct UserLocks {
    stripes: Vec<Mutex<()>>,
}

impl UserLocks {
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    fn stripe_for(&self, user_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// Hold the stripe owning `user_id` until the guard drops
    pub async fn lock(&self, user_id: &str) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_for(user_id)].lock().await
    }
}

impl Default for UserLocks {
    fn default() -> Self {
        Self::new(64)
    }
}
