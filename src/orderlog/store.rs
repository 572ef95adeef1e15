//! Abstract order log trait.
//!
//! Any durable order store must implement [`OrderLog`].  The trait uses
//! manually desugared async methods (pinned futures) so SQLite and
//! in-memory implementations can sit behind the same `Arc<dyn OrderLog>`.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use utoipa::ToSchema;

/// A single purchase order.
///
/// Records are immutable once minted and are replicated byte-for-byte, so
/// equality is full value equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    /// Globally ordered primary key.
    pub order_number: i64,
    /// Product that was bought.
    #[serde(rename = "name")]
    pub product_name: String,
    /// Units bought.
    pub quantity: i32,
}

impl OrderRecord {
    pub fn new(order_number: i64, product_name: impl Into<String>, quantity: i32) -> Self {
        Self {
            order_number,
            product_name: product_name.into(),
            quantity,
        }
    }
}

/// Durable ordered collection of [`OrderRecord`]s keyed by order number.
///
/// Implementations must allow concurrent readers while a writer excludes
/// everyone else.
pub trait OrderLog: Send + Sync + 'static {
    /// Insert a single record. Returns `false` when the key already exists.
    fn insert(
        &self,
        record: OrderRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// Insert every record independently, skipping keys that already exist
    /// (in the log or earlier in the batch). Returns the number inserted.
    fn insert_batch(
        &self,
        records: Vec<OrderRecord>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<usize>> + Send + '_>>;

    /// Point lookup by order number.
    fn get(
        &self,
        order_number: i64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<OrderRecord>>> + Send + '_>>;

    /// All records with a key strictly greater than `order_number`, ascending.
    fn range_after(
        &self,
        order_number: i64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<OrderRecord>>> + Send + '_>>;

    /// Largest order number present, or 0 for an empty log.
    fn max_key(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<i64>> + Send + '_>>;
}
