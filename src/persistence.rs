//! Persistence collaborator (spec §1 "explicitly out of scope", §6.2).
//!
//! The relational store of restaurants/tables/menus/orders, checkout, and
//! order idempotency all live outside this engine's scope. What the engine
//! needs from that collaborator is modeled here as a trait so the rest of
//! the crate never depends on a concrete storage backend; production
//! deployments supply their own implementation (e.g. backed by the
//! restaurant's relational store). [`InMemoryStore`] is a reference stub
//! used by tests and the example binary, not a reimplementation of the
//! CRUD surface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// A single orderable item (spec §6.2 `get_menu` `products[]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MenuItem {
    /// Product name, as spoken/recognized (e.g. "Pizza").
    pub name: String,
    /// Price in the restaurant's currency minor units (e.g. kuruş).
    pub price: u32,
}

/// The menu and table context loaded at session-open (spec §6.2
/// `get_menu`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuContext {
    /// Restaurant display name.
    pub restaurant: String,
    /// Table display identifier.
    pub table: String,
    /// Orderable items.
    pub products: Vec<MenuItem>,
    /// Declared allergens, if any.
    #[serde(default)]
    pub allergens: Vec<String>,
}

impl MenuContext {
    /// Render a compact textual menu for the LLM system prompt (spec
    /// §4.2 "menu context").
    #[must_use]
    pub fn to_prompt_context(&self) -> String {
        let items: Vec<String> = self
            .products
            .iter()
            .map(|p| format!("{}: {}", p.name, p.price))
            .collect();
        format!("{{{}}}", items.join(", "))
    }
}

/// One cart line item handed to [`MenuAndOrderStore::place_order`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    /// Product name as named by the structured intent.
    pub product_name: String,
    /// Quantity requested.
    pub quantity: u32,
}

/// Result of a successful order placement (spec §6.2 `place_order`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    /// Order identifier assigned by the collaborator.
    pub order_id: String,
    /// Total price in minor units.
    pub total: u32,
    /// Collaborator-reported status string.
    pub status: String,
}

/// Error surfaced by the persistence collaborator.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// The QR token does not resolve to a known table (spec §7
    /// `TableUnknown`).
    #[error("unknown table for token")]
    UnknownTable,
    /// Any other collaborator-side failure.
    #[error("persistence collaborator error: {0}")]
    Other(String),
}

/// The out-of-scope collaborator's contract as consumed by this engine
/// (spec §6.2). The collaborator owns idempotency — `place_order` may be
/// called more than once for the same turn under retry and must not
/// double-charge (spec §1 Non-goal (d)).
#[async_trait]
pub trait MenuAndOrderStore: Send + Sync {
    /// Load the menu and table context for a QR token (spec §6.1
    /// session-open).
    async fn get_menu(&self, qr_token: &str) -> Result<MenuContext, PersistenceError>;

    /// Place an order for the given cart items (spec §4.8 step 6, on an
    /// `add`-intent turn completion).
    async fn place_order(
        &self,
        qr_token: &str,
        items: Vec<OrderItem>,
    ) -> Result<OrderAck, PersistenceError>;

    /// Request the check for a table (spec §6.2, on a `check`-intent
    /// turn).
    async fn request_check(&self, qr_token: &str) -> Result<(), PersistenceError>;
}

/// In-memory reference implementation, used by tests and the example
/// binary. Not a production storage backend.
pub struct InMemoryStore {
    tables: Mutex<HashMap<String, MenuContext>>,
}

impl InMemoryStore {
    /// Construct a store pre-seeded with `tables` (QR token → menu
    /// context).
    #[must_use]
    pub fn new(tables: HashMap<String, MenuContext>) -> Self {
        Self {
            tables: Mutex::new(tables),
        }
    }
}

#[async_trait]
impl MenuAndOrderStore for InMemoryStore {
    async fn get_menu(&self, qr_token: &str) -> Result<MenuContext, PersistenceError> {
        self.tables
            .lock()
            .await
            .get(qr_token)
            .cloned()
            .ok_or(PersistenceError::UnknownTable)
    }

    async fn place_order(
        &self,
        qr_token: &str,
        items: Vec<OrderItem>,
    ) -> Result<OrderAck, PersistenceError> {
        let tables = self.tables.lock().await;
        let menu = tables.get(qr_token).ok_or(PersistenceError::UnknownTable)?;
        let total = items
            .iter()
            .map(|item| {
                menu.products
                    .iter()
                    .find(|p| p.name.eq_ignore_ascii_case(&item.product_name))
                    .map_or(0, |p| p.price * item.quantity)
            })
            .sum();
        Ok(OrderAck {
            order_id: uuid::Uuid::new_v4().to_string(),
            total,
            status: "placed".into(),
        })
    }

    async fn request_check(&self, qr_token: &str) -> Result<(), PersistenceError> {
        if self.tables.lock().await.contains_key(qr_token) {
            Ok(())
        } else {
            Err(PersistenceError::UnknownTable)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> InMemoryStore {
        let mut tables = HashMap::new();
        tables.insert(
            "T1".to_owned(),
            MenuContext {
                restaurant: "Sofra".into(),
                table: "1".into(),
                products: vec![
                    MenuItem { name: "Pizza".into(), price: 150 },
                    MenuItem { name: "Kola".into(), price: 25 },
                ],
                allergens: vec![],
            },
        );
        InMemoryStore::new(tables)
    }

    #[tokio::test]
    async fn get_menu_returns_unknown_table_for_missing_token() {
        let store = seeded_store();
        let result = store.get_menu("missing").await;
        assert!(matches!(result, Err(PersistenceError::UnknownTable)));
    }

    #[tokio::test]
    async fn place_order_computes_total_from_menu_prices() {
        let store = seeded_store();
        let ack = store
            .place_order(
                "T1",
                vec![OrderItem { product_name: "Pizza".into(), quantity: 2 }],
            )
            .await
            .unwrap();
        assert_eq!(ack.total, 300);
        assert_eq!(ack.status, "placed");
    }
}
