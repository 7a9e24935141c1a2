//! Provisioned identities and the pool VUs share.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use rand::Rng;

use crate::error::{IdentityError, PoolError};

/// Username and password for a user that may not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Fresh credentials, unique across runs.
    ///
    /// Usernames look like `<prefix>_<unix millis>_<random>`; `salt` is added
    /// to the random part so sequential slots within one millisecond differ.
    pub fn generate<R: Rng + ?Sized>(prefix: &str, salt: u64, rng: &mut R) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        let random = rng.gen_range(0..100_000u64).wrapping_add(salt);

        Self {
            username: format!("{}_{}_{}", prefix, millis, random),
            password: format!("Pass{}!@#", random),
        }
    }
}

/// A user with a live token and an open account. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    id: String,
    username: String,
    password: String,
    token: String,
    account_id: String,
}

impl Identity {
    /// Every field must be non-empty, so a pool reader can never see a
    /// half-provisioned user.
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        token: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Result<Self, IdentityError> {
        let identity = Self {
            id: id.into(),
            username: username.into(),
            password: password.into(),
            token: token.into(),
            account_id: account_id.into(),
        };

        for (field, value) in [
            ("id", &identity.id),
            ("username", &identity.username),
            ("password", &identity.password),
            ("token", &identity.token),
            ("account_id", &identity.account_id),
        ] {
            if value.is_empty() {
                return Err(IdentityError::EmptyField(field));
            }
        }

        Ok(identity)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

#[derive(Default)]
struct PoolState {
    entries: Vec<Arc<Identity>>,
    /// account id -> index in `entries`
    accounts: HashMap<String, usize>,
}

/// Append-only identity collection shared by every VU.
///
/// Cloning is cheap and every clone sees the same entries. Both the entry
/// list and the account index change under a single write lock, so readers
/// see either the old pool or the new one, never a mix.
#[derive(Clone, Default)]
pub struct IdentityPool {
    state: Arc<RwLock<PoolState>>,
}

impl IdentityPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully built identity. Returns the pool size after the insert.
    pub fn add(&self, identity: Identity) -> Result<usize, PoolError> {
        let mut state = self.state.write();
        if state.accounts.contains_key(identity.account_id()) {
            return Err(PoolError::DuplicateAccount(identity.account_id().to_string()));
        }

        let index = state.entries.len();
        state
            .accounts
            .insert(identity.account_id().to_string(), index);
        state.entries.push(Arc::new(identity));
        Ok(state.entries.len())
    }

    /// A uniformly random entry, or `None` while the pool is still empty.
    pub fn random_pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Arc<Identity>> {
        let state = self.state.read();
        if state.entries.is_empty() {
            return None;
        }
        let index = rng.gen_range(0..state.entries.len());
        Some(Arc::clone(&state.entries[index]))
    }

    /// A uniformly random entry whose account differs from `account_id`.
    pub fn pick_other<R: Rng + ?Sized>(
        &self,
        account_id: &str,
        rng: &mut R,
    ) -> Option<Arc<Identity>> {
        let state = self.state.read();
        let len = state.entries.len();

        match state.accounts.get(account_id) {
            Some(&excluded) => {
                if len < 2 {
                    return None;
                }
                let mut index = rng.gen_range(0..len - 1);
                if index >= excluded {
                    index += 1;
                }
                Some(Arc::clone(&state.entries[index]))
            }
            None if len == 0 => None,
            None => Some(Arc::clone(&state.entries[rng.gen_range(0..len)])),
        }
    }

    pub fn size(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn snapshot(&self) -> Vec<Arc<Identity>> {
        self.state.read().entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn identity(n: usize) -> Identity {
        Identity::new(
            format!("user-{}", n),
            format!("name-{}", n),
            "secret",
            format!("token-{}", n),
            format!("acct-{}", n),
        )
        .unwrap()
    }

    #[test]
    fn test_identity_rejects_empty_fields() {
        let err = Identity::new("id", "name", "pw", "", "acct").unwrap_err();
        assert_eq!(err, IdentityError::EmptyField("token"));
        let err = Identity::new("id", "name", "pw", "tok", "").unwrap_err();
        assert_eq!(err, IdentityError::EmptyField("account_id"));
    }

    #[test]
    fn test_generated_credentials_differ() {
        let mut rng = StdRng::seed_from_u64(1);
        let a = Credentials::generate("loaduser", 0, &mut rng);
        let b = Credentials::generate("loaduser", 1, &mut rng);
        assert!(a.username.starts_with("loaduser_"));
        assert!(a.password.starts_with("Pass") && a.password.ends_with("!@#"));
        assert_ne!(a.username, b.username);
    }

    #[test]
    fn test_empty_pool_picks_nothing() {
        let pool = IdentityPool::new();
        let mut rng = StdRng::seed_from_u64(7);
        assert!(pool.is_empty());
        assert!(pool.random_pick(&mut rng).is_none());
        assert!(pool.pick_other("acct-0", &mut rng).is_none());
    }

    #[test]
    fn test_duplicate_account_is_rejected() {
        let pool = IdentityPool::new();
        assert_eq!(pool.add(identity(1)), Ok(1));
        assert_eq!(
            pool.add(identity(1)),
            Err(PoolError::DuplicateAccount("acct-1".to_string()))
        );
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn test_pick_other_never_returns_excluded_account() {
        let mut rng = StdRng::seed_from_u64(42);
        for size in 2..12 {
            let pool = IdentityPool::new();
            for n in 0..size {
                pool.add(identity(n)).unwrap();
            }
            for _ in 0..500 {
                let from = pool.random_pick(&mut rng).unwrap();
                let to = pool.pick_other(from.account_id(), &mut rng).unwrap();
                assert_ne!(from.account_id(), to.account_id());
            }
        }
    }

    #[test]
    fn test_pick_other_with_single_entry_is_none() {
        let pool = IdentityPool::new();
        pool.add(identity(0)).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(pool.pick_other("acct-0", &mut rng).is_none());
        assert!(pool.pick_other("acct-unknown", &mut rng).is_some());
    }

    #[test]
    fn test_random_pick_covers_every_entry() {
        let pool = IdentityPool::new();
        for n in 0..5 {
            pool.add(identity(n)).unwrap();
        }
        let mut rng = StdRng::seed_from_u64(11);
        let seen: HashSet<String> = (0..1_000)
            .map(|_| pool.random_pick(&mut rng).unwrap().account_id().to_string())
            .collect();
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_and_reads() {
        let pool = IdentityPool::new();
        let mut handles = Vec::new();

        for writer in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                for n in 0..250 {
                    pool.add(identity(writer * 1_000 + n)).unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for reader in 0..4u64 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let mut rng = StdRng::seed_from_u64(reader);
                for _ in 0..1_000 {
                    if let Some(entry) = pool.random_pick(&mut rng) {
                        assert!(!entry.token().is_empty());
                        assert!(!entry.account_id().is_empty());
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        let accounts: HashSet<String> = pool
            .snapshot()
            .iter()
            .map(|entry| entry.account_id().to_string())
            .collect();
        assert_eq!(pool.size(), 2_000);
        assert_eq!(accounts.len(), 2_000);
    }
}
