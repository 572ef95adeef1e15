//! Catalog (inventory) collaborator.
//!
//! The order service never owns stock; it asks the catalog to decrement it
//! before committing an order, and to put it back if the commit fails.

pub mod http;
pub mod memory;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Route the catalog service serves stock changes on.
pub const CHANGE_STOCK_PATH: &str = "/rpc/change-stock";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStockRequest {
    pub name: String,
    pub quantity: i32,
    pub is_increment: bool,
}

/// Answer to a stock change. `error_message` is user-facing text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockChange {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StockChange {
    pub fn applied() -> Self {
        Self {
            success: true,
            error_message: None,
        }
    }

    pub fn refused(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
        }
    }
}

/// Stock keeper consulted by `Buy`.
///
/// `Ok` with `success == false` is a business refusal (unknown product,
/// not enough stock). `Err` means the catalog could not be asked at all.
pub trait Catalog: Send + Sync + 'static {
    fn change_stock(
        &self,
        name: &str,
        quantity: i32,
        is_increment: bool,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<StockChange>> + Send + '_>>;
}
