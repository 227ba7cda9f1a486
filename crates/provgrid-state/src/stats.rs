//! Read-only statistics recomputed from the reservations table.

use redb::ReadableTable;

use crate::error::StateResult;
use crate::scope::SystemScope;
use crate::store::{StateStore, decode};
use crate::tables::RESERVATIONS;
use crate::traits::StatisticsSource;
use crate::types::*;

const DAY_SECS: u64 = 24 * 60 * 60;

impl StateStore {
    /// Aggregate all reservations relative to `now` (unix seconds).
    pub fn statistics_at(&self, scope: &SystemScope, now: u64) -> StateResult<Statistics> {
        let day_ago = now.saturating_sub(DAY_SECS);
        let month_ago = now.saturating_sub(28 * DAY_SECS);

        scope.in_scope(|| {
            self.read(|txn| {
                let headers = txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
                let mut stats = Statistics {
                    computed_at: now,
                    ..Statistics::default()
                };
                for entry in headers.iter().map_err(map_err!(Read))? {
                    let (_, value) = entry.map_err(map_err!(Read))?;
                    let reservation: Reservation = decode(value.value())?;
                    stats.all.record(&reservation);
                    if reservation.created_at >= day_ago {
                        stats.last_24h.record(&reservation);
                    }
                    if reservation.created_at >= month_ago {
                        stats.last_28d.record(&reservation);
                    }
                    stats
                        .by_provider
                        .entry(reservation.provider.to_string())
                        .or_default()
                        .record(&reservation);
                }
                Ok(stats)
            })
        })
    }
}

impl StatisticsSource for StateStore {
    fn statistics(&self, scope: &SystemScope) -> StateResult<Statistics> {
        self.statistics_at(scope, prov_core::unix_now())
    }
}
