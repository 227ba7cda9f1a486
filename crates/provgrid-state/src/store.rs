//! redb-backed persistence for provgrid.
//!
//! Owns the database handle, the transaction helpers shared by every table
//! module, and the account directory. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::scope::SystemScope;
use crate::tables::*;
use crate::traits::AccountDirectory;
use crate::types::*;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    #[cfg(test)]
    pub(crate) fail_detail_insert: Arc<std::sync::atomic::AtomicBool>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            #[cfg(test)]
            fail_detail_insert: Default::default(),
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        self.write(|txn| {
            // Opening a table in a write transaction creates it if absent.
            txn.open_table(ACCOUNTS).map_err(map_err!(Table))?;
            txn.open_table(ACCOUNTS_BY_ORG).map_err(map_err!(Table))?;
            txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
            txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
            txn.open_table(RESERVATIONS_BY_ACCOUNT).map_err(map_err!(Table))?;
            txn.open_table(DETAILS).map_err(map_err!(Table))?;
            txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            Ok(())
        })
    }

    /// Run `f` in a read transaction.
    pub(crate) fn read<T>(
        &self,
        f: impl FnOnce(&ReadTransaction) -> StateResult<T>,
    ) -> StateResult<T> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        f(&txn)
    }

    /// Run `f` in a write transaction, committing on `Ok` and aborting on `Err`.
    ///
    /// redb admits one writer at a time, so everything `f` reads and writes
    /// is isolated from concurrent writers.
    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&WriteTransaction) -> StateResult<T>,
    ) -> StateResult<T> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        match f(&txn) {
            Ok(value) => {
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = txn.abort() {
                    warn!(error = %abort, "write transaction abort failed");
                }
                Err(e)
            }
        }
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Load and decode the row stored under a `u64` id.
pub(crate) fn load<T: DeserializeOwned>(
    table: &impl ReadableTable<u64, &'static [u8]>,
    id: u64,
) -> StateResult<Option<T>> {
    match table.get(id).map_err(map_err!(Read))? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

/// Allocate the next value of a surrogate id sequence.
pub(crate) fn next_id(txn: &WriteTransaction, sequence: &str) -> StateResult<u64> {
    let mut table = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
    let next = table
        .get(sequence)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0)
        + 1;
    table.insert(sequence, next).map_err(map_err!(Write))?;
    Ok(next)
}

fn account_not_found(what: impl std::fmt::Display) -> StateError {
    StateError::NotFound(format!("account {what}"))
}

/// Insert `account` under a fresh id. Fails with `Conflict` when the
/// organization is already indexed.
fn insert_account(
    txn: &WriteTransaction,
    org_id: &str,
    account_number: Option<&str>,
) -> StateResult<Account> {
    let mut by_org = txn.open_table(ACCOUNTS_BY_ORG).map_err(map_err!(Table))?;
    if by_org.get(org_id).map_err(map_err!(Read))?.is_some() {
        return Err(StateError::Conflict(format!(
            "account for organization {org_id} already exists"
        )));
    }
    let account = Account {
        id: next_id(txn, ACCOUNT_SEQ)?,
        org_id: org_id.to_string(),
        account_number: account_number.map(str::to_string),
    };
    let value = encode(&account)?;
    let mut accounts = txn.open_table(ACCOUNTS).map_err(map_err!(Table))?;
    accounts
        .insert(account.id, value.as_slice())
        .map_err(map_err!(Write))?;
    by_org
        .insert(org_id, account.id)
        .map_err(map_err!(Write))?;
    Ok(account)
}

impl StateStore {
    fn find_account_by_org(&self, org_id: &str) -> StateResult<Option<Account>> {
        self.read(|txn| {
            let by_org = txn.open_table(ACCOUNTS_BY_ORG).map_err(map_err!(Table))?;
            let Some(id) = by_org.get(org_id).map_err(map_err!(Read))?.map(|g| g.value()) else {
                return Ok(None);
            };
            let accounts = txn.open_table(ACCOUNTS).map_err(map_err!(Table))?;
            load(&accounts, id)
        })
    }
}

impl AccountDirectory for StateStore {
    fn create_account(&self, scope: &SystemScope, account: &Account) -> StateResult<Account> {
        scope.in_scope(|| {
            let created = self.write(|txn| {
                insert_account(txn, &account.org_id, account.account_number.as_deref())
            })?;
            debug!(account_id = created.id, org_id = %created.org_id, "account stored");
            Ok(created)
        })
    }

    fn get_account(&self, scope: &SystemScope, id: AccountId) -> StateResult<Account> {
        scope.in_scope(|| {
            self.read(|txn| {
                let accounts = txn.open_table(ACCOUNTS).map_err(map_err!(Table))?;
                load(&accounts, id)?.ok_or_else(|| account_not_found(id))
            })
        })
    }

    fn get_account_by_org(&self, scope: &SystemScope, org_id: &str) -> StateResult<Account> {
        scope.in_scope(|| {
            self.find_account_by_org(org_id)?
                .ok_or_else(|| account_not_found(format!("for organization {org_id}")))
        })
    }

    fn get_or_create(
        &self,
        scope: &SystemScope,
        org_id: &str,
        account_number: Option<&str>,
    ) -> StateResult<Account> {
        if org_id.trim().is_empty() {
            return Err(StateError::Validation("organization id is empty".to_string()));
        }
        scope.in_scope(|| {
            if let Some(account) = self.find_account_by_org(org_id)? {
                return Ok(account);
            }
            // Another caller may have created it since the read; the write
            // transaction re-checks the index and returns the winner.
            self.write(|txn| match insert_account(txn, org_id, account_number) {
                Ok(account) => {
                    debug!(account_id = account.id, org_id, "account created on first contact");
                    Ok(account)
                }
                Err(StateError::Conflict(_)) => {
                    let by_org = txn.open_table(ACCOUNTS_BY_ORG).map_err(map_err!(Table))?;
                    let id = by_org
                        .get(org_id)
                        .map_err(map_err!(Read))?
                        .map(|g| g.value())
                        .ok_or_else(|| account_not_found(format!("for organization {org_id}")))?;
                    let accounts = txn.open_table(ACCOUNTS).map_err(map_err!(Table))?;
                    load(&accounts, id)?.ok_or_else(|| account_not_found(id))
                }
                Err(e) => Err(e),
            })
        })
    }

    fn list_accounts(
        &self,
        scope: &SystemScope,
        limit: usize,
        offset: usize,
    ) -> StateResult<Vec<Account>> {
        scope.in_scope(|| {
            self.read(|txn| {
                let accounts = txn.open_table(ACCOUNTS).map_err(map_err!(Table))?;
                let mut results = Vec::new();
                for entry in accounts
                    .iter()
                    .map_err(map_err!(Read))?
                    .skip(offset)
                    .take(limit)
                {
                    let (_, value) = entry.map_err(map_err!(Read))?;
                    results.push(decode(value.value())?);
                }
                Ok(results)
            })
        })
    }
}
