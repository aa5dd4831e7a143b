use std::sync::Arc;

use tokio::sync::watch;

use crate::engine::snapshot::{Stamped, Versioned};
use crate::error::AppError;
use crate::models::order::{Order, OrderStatus};
use crate::service::DispatchBackend;

/// The pre-delivery order list shown to the dispatcher.
#[derive(Clone)]
pub struct OrderBook {
    cell: Arc<Versioned<Vec<Order>>>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            cell: Arc::new(Versioned::new(Vec::new())),
        }
    }

    pub fn orders(&self) -> Vec<Order> {
        self.cell.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<Stamped<Vec<Order>>> {
        self.cell.subscribe()
    }

    /// Fetches the pre-delivery list. Returns `None` when a newer refresh
    /// already published, so callers do not act on an outdated list.
    pub async fn refresh<B>(&self, backend: &B) -> Result<Option<Vec<Order>>, AppError>
    where
        B: DispatchBackend + ?Sized,
    {
        let ticket = self.cell.ticket();
        let orders = backend.list_orders(OrderStatus::PreDelivery).await?;

        if self.cell.publish(ticket, orders.clone()) {
            Ok(Some(orders))
        } else {
            Ok(None)
        }
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}
