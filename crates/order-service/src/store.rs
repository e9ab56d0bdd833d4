//! Order persistence seam.

use async_trait::async_trait;
use chrono::Utc;
use shop_core::error::CoreError;
use shop_core::order::{NewOrder, OrderRecord};
use tokio::sync::RwLock;

/// Where orders are persisted.
#[async_trait]
pub trait OrderStore: Send + Sync + 'static {
    /// Persist `order` for `user_id` and return the stored record.
    async fn save(&self, user_id: &str, order: NewOrder) -> Result<OrderRecord, CoreError>;

    /// Orders placed by `user_id`, oldest first.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<OrderRecord>, CoreError>;
}

/// Process-local order store.
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<Vec<OrderRecord>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn save(&self, user_id: &str, order: NewOrder) -> Result<OrderRecord, CoreError> {
        let record = OrderRecord {
            id: uuid::Uuid::now_v7().to_string(),
            user_id: user_id.to_string(),
            email: order.email.trim().to_string(),
            amount: order.amount,
            status: order.status,
            created_at: Utc::now(),
        };
        self.orders.write().await.push(record.clone());
        Ok(record)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<OrderRecord>, CoreError> {
        Ok(self
            .orders
            .read()
            .await
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_order(amount: i64) -> NewOrder {
        NewOrder {
            email: " b@x.com ".into(),
            amount,
            status: "success".into(),
        }
    }

    #[tokio::test]
    async fn save_assigns_ids_and_lists_per_user() {
        let store = InMemoryOrderStore::new();
        let first = store.save("user_1", new_order(100)).await.unwrap();
        let second = store.save("user_1", new_order(200)).await.unwrap();
        store.save("user_2", new_order(300)).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(first.email, "b@x.com");
        assert_eq!(store.len().await, 3);

        let mine = store.list_for_user("user_1").await.unwrap();
        assert_eq!(
            mine.iter().map(|o| o.amount).collect::<Vec<_>>(),
            vec![100, 200]
        );
        assert!(store.list_for_user("nobody").await.unwrap().is_empty());
    }
}
