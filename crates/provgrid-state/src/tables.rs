//! redb table definitions for the provgrid state store.
//!
//! Rows keyed by surrogate id use `u64` keys. Secondary indexes use
//! zero-padded composite `&str` keys (`{parent:020}:{child}`) so lexical order
//! equals numeric order and related rows can be prefix-scanned.

use redb::TableDefinition;

/// Accounts keyed by id.
pub const ACCOUNTS: TableDefinition<u64, &[u8]> = TableDefinition::new("accounts");

/// Uniqueness index: organization id -> account id.
pub const ACCOUNTS_BY_ORG: TableDefinition<&str, u64> = TableDefinition::new("accounts_by_org");

/// Surrogate id counters keyed by sequence name.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// Reservation headers keyed by id.
pub const RESERVATIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("reservations");

/// Ownership index keyed by `{account_id:020}:{reservation_id:020}`.
pub const RESERVATIONS_BY_ACCOUNT: TableDefinition<&str, u64> =
    TableDefinition::new("reservations_by_account");

/// Provider detail rows keyed by reservation id.
pub const DETAILS: TableDefinition<u64, &[u8]> = TableDefinition::new("reservation_details");

/// Instances keyed by `{reservation_id:020}:{instance_id}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("reservation_instances");

pub(crate) const ACCOUNT_SEQ: &str = "accounts";
pub(crate) const RESERVATION_SEQ: &str = "reservations";

pub(crate) fn account_reservation_key(account_id: u64, reservation_id: u64) -> String {
    format!("{account_id:020}:{reservation_id:020}")
}

pub(crate) fn account_prefix(account_id: u64) -> String {
    format!("{account_id:020}:")
}

/// Exclusive upper bound of the rows under `parent`. `;` is the byte after `:`.
pub(crate) fn prefix_end(parent: u64) -> String {
    format!("{parent:020};")
}

pub(crate) fn instance_key(reservation_id: u64, instance_id: &str) -> String {
    format!("{reservation_id:020}:{instance_id}")
}

pub(crate) fn instance_prefix(reservation_id: u64) -> String {
    format!("{reservation_id:020}:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_keys_sort_numerically() {
        assert!(account_reservation_key(1, 9) < account_reservation_key(1, 10));
        assert!(account_reservation_key(2, 1) > account_reservation_key(1, 99));
        assert!(instance_key(7, "i-1").starts_with(&instance_prefix(7)));
        assert!(!instance_key(70, "i-1").starts_with(&instance_prefix(7)));
    }

    #[test]
    fn prefix_end_bounds_every_child_key() {
        for parent in [0, 7, u64::MAX] {
            let end = prefix_end(parent);
            assert!(instance_prefix(parent) < end);
            assert!(instance_key(parent, "~~~~") < end);
            assert!(account_reservation_key(parent, u64::MAX) < end);
        }
        assert!(prefix_end(7) <= account_prefix(8));
    }
}
