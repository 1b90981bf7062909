//! Account records and their JSON store.
//!
//! The orchestrator only ever sees an [`AccountTable`] snapshot. Mutations go
//! through [`AccountStore`], which persists after every change.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

pub const DEFAULT_ACCOUNTS_FILE: &str = "accounts.json";

/// Accounts are identified by username.
pub type AccountId = String;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: AccountId,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

impl Account {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            proxy: None,
        }
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            return Err(FleetError::Validation("username must not be empty".into()));
        }
        if self.password.is_empty() {
            return Err(FleetError::Validation(format!(
                "password for {} must not be empty",
                self.username
            )));
        }
        Ok(())
    }
}

// Credentials stay out of logs.
impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("proxy", &self.proxy)
            .finish()
    }
}

/// Read-only, ordered snapshot of the known accounts.
#[derive(Debug, Clone, Default)]
pub struct AccountTable {
    ordered: Vec<Arc<Account>>,
    index: HashMap<AccountId, usize>,
}

impl AccountTable {
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
        let mut table = Self::default();
        for account in accounts {
            if table.index.contains_key(&account.username) {
                tracing::warn!(account = %account.username, "Duplicate account ignored");
                continue;
            }
            table
                .index
                .insert(account.username.clone(), table.ordered.len());
            table.ordered.push(Arc::new(account));
        }
        table
    }

    pub fn get(&self, id: &str) -> Option<Arc<Account>> {
        self.index.get(id).map(|&i| self.ordered[i].clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Account ids in table order
    pub fn ids(&self) -> Vec<AccountId> {
        self.ordered.iter().map(|a| a.username.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Ordered account records backed by a JSON file.
#[derive(Debug)]
pub struct AccountStore {
    path: PathBuf,
    accounts: Vec<Account>,
}

impl AccountStore {
    /// Load accounts from `path`. A missing file yields an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let accounts = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), "Loaded accounts");
        Ok(Self { path, accounts })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn get(&self, username: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.username == username)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&self.accounts)?)?;
        Ok(())
    }

    pub fn add(&mut self, account: Account) -> Result<()> {
        account.validate()?;
        if self.get(&account.username).is_some() {
            return Err(FleetError::Validation(format!(
                "account {} already exists",
                account.username
            )));
        }
        tracing::info!(account = %account.username, "Account added");
        self.accounts.push(account);
        self.save()
    }

    /// Replace the credentials of an existing account, keeping its position.
    pub fn update(&mut self, account: Account) -> Result<()> {
        account.validate()?;
        let slot = self
            .accounts
            .iter_mut()
            .find(|a| a.username == account.username)
            .ok_or_else(|| {
                FleetError::Validation(format!("unknown account {}", account.username))
            })?;
        *slot = account;
        tracing::info!(account = %slot.username, "Account updated");
        self.save()
    }

    pub fn remove(&mut self, username: &str) -> Result<Account> {
        let pos = self
            .accounts
            .iter()
            .position(|a| a.username == username)
            .ok_or_else(|| FleetError::Validation(format!("unknown account {}", username)))?;
        let removed = self.accounts.remove(pos);
        tracing::info!(account = %username, "Account removed");
        self.save()?;
        Ok(removed)
    }

    /// Snapshot for handing to the orchestrator.
    pub fn table(&self) -> AccountTable {
        AccountTable::new(self.accounts.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_password() {
        let account = Account::new("alice", "hunter2");
        let rendered = format!("{:?}", account);
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn table_preserves_order_and_skips_duplicates() {
        let table = AccountTable::new(vec![
            Account::new("carol", "x"),
            Account::new("alice", "y"),
            Account::new("carol", "z"),
        ]);
        assert_eq!(table.ids(), vec!["carol".to_string(), "alice".to_string()]);
        assert_eq!(table.get("carol").unwrap().password, "x");
        assert!(table.get("bob").is_none());
    }

    #[test]
    fn missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = AccountStore::load(dir.path().join("accounts.json")).unwrap();
        assert!(store.accounts().is_empty());
        assert!(store.table().is_empty());
    }

    #[test]
    fn mutations_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");

        let mut store = AccountStore::load(&path).unwrap();
        store.add(Account::new("alice", "pw1")).unwrap();
        store
            .add(Account::new("bob", "pw2").with_proxy("socks5://127.0.0.1:1080"))
            .unwrap();
        store.update(Account::new("alice", "pw3")).unwrap();

        let reloaded = AccountStore::load(&path).unwrap();
        assert_eq!(reloaded.accounts().len(), 2);
        assert_eq!(reloaded.accounts()[0].username, "alice");
        assert_eq!(reloaded.accounts()[0].password, "pw3");
        assert_eq!(
            reloaded.get("bob").unwrap().proxy.as_deref(),
            Some("socks5://127.0.0.1:1080")
        );

        let mut store = reloaded;
        let removed = store.remove("alice").unwrap();
        assert_eq!(removed.username, "alice");
        let reloaded = AccountStore::load(&path).unwrap();
        assert_eq!(reloaded.table().ids(), vec!["bob".to_string()]);
    }

    #[test]
    fn reads_files_without_proxy_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        std::fs::write(&path, r#"[{"username": "alice", "password": "pw"}]"#).unwrap();

        let store = AccountStore::load(&path).unwrap();
        assert_eq!(store.accounts()[0].proxy, None);
    }

    #[test]
    fn rejects_duplicates_and_blank_fields() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = AccountStore::load(dir.path().join("accounts.json")).unwrap();
        store.add(Account::new("alice", "pw")).unwrap();

        assert!(matches!(
            store.add(Account::new("alice", "other")),
            Err(FleetError::Validation(_))
        ));
        assert!(matches!(
            store.add(Account::new(" ", "pw")),
            Err(FleetError::Validation(_))
        ));
        assert!(matches!(
            store.add(Account::new("bob", "")),
            Err(FleetError::Validation(_))
        ));
        assert!(matches!(
            store.update(Account::new("nobody", "pw")),
            Err(FleetError::Validation(_))
        ));
        assert!(store.remove("nobody").is_err());
    }
}
