//! Axum handlers for the order-service RPC surface.

pub mod cluster;
pub mod orders;
