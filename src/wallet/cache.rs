//! Derived account cache
//!
//! Derivation is a pure function of the root key and the path, so results
//! never go stale; entries live for as long as the cache.

use std::collections::HashMap;
use std::sync::RwLock;

use super::derivation::{derive, RootPublicKey};
use crate::error::{ChainSigError, ChainSigResult};
use crate::types::{DerivationPath, DerivedAccount};

/// Memoizes `derive` for one root key
pub struct AccountCache {
    root: RootPublicKey,
    entries: RwLock<HashMap<DerivationPath, DerivedAccount>>,
}

impl AccountCache {
    pub fn new(root: RootPublicKey) -> Self {
        Self {
            root,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &RootPublicKey {
        &self.root
    }

    /// Return the cached account for `path`, deriving it on first use
    pub fn get_or_derive(&self, path: &DerivationPath) -> ChainSigResult<DerivedAccount> {
        if let Some(account) = self
            .entries
            .read()
            .map_err(|_| ChainSigError::derivation("account cache lock poisoned"))?
            .get(path)
        {
            return Ok(*account);
        }

        let account = derive(&self.root, path)?;
        self.entries
            .write()
            .map_err(|_| ChainSigError::derivation("account cache lock poisoned"))?
            .insert(path.clone(), account);
        Ok(account)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}
