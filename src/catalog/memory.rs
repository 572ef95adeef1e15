//! In-process catalog for tests and standalone nodes.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use super::{Catalog, StockChange};

/// Stock counts held in a map, seeded at construction.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    stock: RwLock<HashMap<String, i64>>,
}

impl MemoryCatalog {
    pub fn new(products: impl IntoIterator<Item = (String, i64)>) -> Self {
        Self {
            stock: RwLock::new(products.into_iter().collect()),
        }
    }

    /// Current stock of `name`, if listed.
    pub fn stock_of(&self, name: &str) -> Option<i64> {
        self.stock.read().expect("rwlock poisoned").get(name).copied()
    }
}

impl Catalog for MemoryCatalog {
    fn change_stock(
        &self,
        name: &str,
        quantity: i32,
        is_increment: bool,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<StockChange>> + Send + '_>> {
        let name = name.to_string();
        Box::pin(async move {
            let mut stock = self.stock.write().expect("rwlock poisoned");
            let Some(available) = stock.get_mut(&name) else {
                return Ok(StockChange::refused(format!(
                    "{name} does not exist in catalog."
                )));
            };
            let quantity = i64::from(quantity);
            if is_increment {
                *available += quantity;
            } else if *available < quantity {
                return Ok(StockChange::refused(format!(
                    "{name}'s stock is less than desired quantity."
                )));
            } else {
                *available -= quantity;
            }
            Ok(StockChange::applied())
        })
    }
}
