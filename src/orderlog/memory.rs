//! In-memory order log.
//!
//! Keeps every record in a `RwLock<BTreeMap>` with no persistence. Useful
//! for tests and ephemeral nodes; ordering and idempotency match the SQLite
//! implementation.

use std::collections::BTreeMap;
use std::future::Future;
use std::ops::Bound;
use std::pin::Pin;
use std::sync::RwLock;

use super::store::{OrderLog, OrderRecord};

#[derive(Debug, Default)]
pub struct MemoryOrderLog {
    records: RwLock<BTreeMap<i64, OrderRecord>>,
}

impl MemoryOrderLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderLog for MemoryOrderLog {
    fn insert(
        &self,
        record: OrderRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        Box::pin(async move {
            let mut records = self.records.write().expect("rwlock poisoned");
            if records.contains_key(&record.order_number) {
                return Ok(false);
            }
            records.insert(record.order_number, record);
            Ok(true)
        })
    }

    fn insert_batch(
        &self,
        batch: Vec<OrderRecord>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<usize>> + Send + '_>> {
        Box::pin(async move {
            let mut records = self.records.write().expect("rwlock poisoned");
            let mut inserted = 0;
            for record in batch {
                if let std::collections::btree_map::Entry::Vacant(slot) =
                    records.entry(record.order_number)
                {
                    slot.insert(record);
                    inserted += 1;
                }
            }
            Ok(inserted)
        })
    }

    fn get(
        &self,
        order_number: i64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<OrderRecord>>> + Send + '_>> {
        Box::pin(async move {
            let records = self.records.read().expect("rwlock poisoned");
            Ok(records.get(&order_number).cloned())
        })
    }

    fn range_after(
        &self,
        order_number: i64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<OrderRecord>>> + Send + '_>> {
        Box::pin(async move {
            let records = self.records.read().expect("rwlock poisoned");
            Ok(records
                .range((Bound::Excluded(order_number), Bound::Unbounded))
                .map(|(_, r)| r.clone())
                .collect())
        })
    }

    fn max_key(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<i64>> + Send + '_>> {
        Box::pin(async move {
            let records = self.records.read().expect("rwlock poisoned");
            Ok(records.keys().next_back().copied().unwrap_or(0))
        })
    }
}
