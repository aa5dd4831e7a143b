use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::Order;

/// Orders chosen for the next run, in the order they were picked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SelectionSet {
    ids: Vec<Uuid>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.ids.contains(id)
    }

    pub fn ids(&self) -> &[Uuid] {
        &self.ids
    }

    /// Returns whether `id` is selected afterwards.
    pub fn toggle(&mut self, id: Uuid, orders: &[Order]) -> Result<bool, AppError> {
        if let Some(position) = self.ids.iter().position(|selected| *selected == id) {
            self.ids.remove(position);
            return Ok(false);
        }

        let candidate = orders
            .iter()
            .any(|order| order.id == id && order.is_dispatch_candidate());
        if !candidate {
            return Err(AppError::Validation(format!(
                "order {id} is not a pre-delivery order"
            )));
        }

        self.ids.push(id);
        Ok(true)
    }

    pub fn select_all(&mut self, orders: &[Order]) {
        for order in orders.iter().filter(|order| order.is_dispatch_candidate()) {
            if !self.contains(&order.id) {
                self.ids.push(order.id);
            }
        }
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn prune(&mut self, orders: &[Order]) -> Vec<Uuid> {
        let mut removed = Vec::new();
        self.ids.retain(|id| {
            let keep = orders
                .iter()
                .any(|order| order.id == *id && order.is_dispatch_candidate());
            if !keep {
                removed.push(*id);
            }
            keep
        });
        removed
    }
}
