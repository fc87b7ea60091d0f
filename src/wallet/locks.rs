use std::collections::HashMap;

use swap_engine::elements::OutPoint;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Lock {
    account: String,
    expires_at: i64,
}

/// Utxos reserved for pending swaps, each until an expiry time.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: HashMap<OutPoint, Lock>,
}

impl LockTable {
    /// Reserve `outpoints` for `secs` from `now`. Returns the unlock time.
    pub fn lock(
        &mut self,
        account: &str,
        outpoints: impl IntoIterator<Item = OutPoint>,
        now: i64,
        secs: i64,
    ) -> i64 {
        let expires_at = now + secs;
        self.lock_until(account, outpoints, expires_at);
        expires_at
    }

    /// Reserve `outpoints` until `expires_at`, replacing any earlier lock.
    pub fn lock_until(
        &mut self,
        account: &str,
        outpoints: impl IntoIterator<Item = OutPoint>,
        expires_at: i64,
    ) {
        for outpoint in outpoints {
            self.locks.insert(
                outpoint,
                Lock {
                    account: account.to_string(),
                    expires_at,
                },
            );
        }
    }

    pub fn is_locked(&self, outpoint: &OutPoint, now: i64) -> bool {
        self.locks
            .get(outpoint)
            .is_some_and(|lock| lock.expires_at > now)
    }

    /// Drop the lock on a spent outpoint.
    pub fn release(&mut self, outpoint: &OutPoint) -> bool {
        self.locks.remove(outpoint).is_some()
    }

    /// Remove every lock that lapsed at or before `now`, grouped by account.
    pub fn release_expired(&mut self, now: i64) -> HashMap<String, Vec<OutPoint>> {
        let mut released: HashMap<String, Vec<OutPoint>> = HashMap::new();
        self.locks.retain(|outpoint, lock| {
            if lock.expires_at <= now {
                released
                    .entry(lock.account.clone())
                    .or_default()
                    .push(*outpoint);
                false
            } else {
                true
            }
        });
        released
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swap_engine::testing::unique_txid;

    fn op() -> OutPoint {
        OutPoint::new(unique_txid(), 0)
    }

    #[test]
    fn lock_expires_at_deadline() {
        let mut table = LockTable::default();
        let a = op();
        let unlock = table.lock("market", [a], 1_000, 120);
        assert_eq!(unlock, 1_120);
        assert!(table.is_locked(&a, 1_119));
        assert!(!table.is_locked(&a, 1_120));
    }

    #[test]
    fn release_expired_groups_by_account() {
        let mut table = LockTable::default();
        let (a, b, c) = (op(), op(), op());
        table.lock("market", [a, b], 0, 10);
        table.lock("fee_account", [c], 0, 100);

        let released = table.release_expired(10);
        assert_eq!(released.len(), 1);
        assert_eq!(released["market"].len(), 2);
        assert_eq!(table.len(), 1);
        assert!(table.release_expired(50).is_empty());
    }

    #[test]
    fn restored_lock_lapses_at_given_time() {
        let mut table = LockTable::default();
        let a = op();
        table.lock_until("market", [a], 5_000);
        assert!(table.is_locked(&a, 4_999));
        assert!(table.release_expired(4_999).is_empty());
        assert_eq!(table.release_expired(5_000)["market"], vec![a]);
    }

    #[test]
    fn spent_outpoints_are_released() {
        let mut table = LockTable::default();
        let a = op();
        table.lock("market", [a], 0, 10);
        assert!(table.release(&a));
        assert!(!table.release(&a));
        assert!(table.is_empty());
    }
}
