use std::collections::BTreeSet;

use crate::error::ConnectionError;

/// One active instrument per connection
pub const DEFAULT_SUBSCRIPTION_LIMIT: usize = 1;

/// Instruments currently subscribed on the market-data connection
///
/// Owned by the connection; a fresh socket has no memory of it, so the whole
/// set is replayed after every reconnect.
#[derive(Debug, Clone)]
pub struct SubscriptionSet {
    instruments: BTreeSet<String>,
    limit: usize,
}

impl SubscriptionSet {
    pub fn new(limit: usize) -> Self {
        Self {
            instruments: BTreeSet::new(),
            limit: limit.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    pub fn contains(&self, instrument: &str) -> bool {
        self.instruments.contains(instrument)
    }

    /// Sorted copy for resubscription and monitoring
    pub fn snapshot(&self) -> Vec<String> {
        self.instruments.iter().cloned().collect()
    }

    /// Add instruments if the limit allows it, returning the ones newly inserted
    ///
    /// A rejected request leaves the set untouched.
    pub fn admit(&mut self, requested: &[String]) -> Result<Vec<String>, ConnectionError> {
        if requested.is_empty() {
            return Err(ConnectionError::EmptySubscription);
        }

        let mut fresh: Vec<String> = requested
            .iter()
            .filter(|i| !self.instruments.contains(i.as_str()))
            .cloned()
            .collect();
        fresh.sort();
        fresh.dedup();

        if self.instruments.len() >= self.limit || self.instruments.len() + fresh.len() > self.limit
        {
            return Err(ConnectionError::SubscriptionLimit {
                limit: self.limit,
                current: self.snapshot(),
            });
        }

        for instrument in &fresh {
            self.instruments.insert(instrument.clone());
        }

        Ok(fresh)
    }

    /// Remove instruments unconditionally; unknown names are ignored
    pub fn remove(&mut self, instruments: &[String]) -> Vec<String> {
        instruments
            .iter()
            .filter(|i| self.instruments.remove(i.as_str()))
            .cloned()
            .collect()
    }

    pub(crate) fn rollback(&mut self, added: &[String]) {
        for instrument in added {
            self.instruments.remove(instrument);
        }
    }
}

impl Default for SubscriptionSet {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIPTION_LIMIT)
    }
}
