use serde::Serialize;

use crate::engine::selection::SelectionSet;
use crate::models::order::Order;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "gate", rename_all = "snake_case")]
pub enum GateDecision {
    Clear,
    NeedsConfirmation { orders: Vec<Order> },
}

/// One-shot interrupt on a user-initiated start: selected orders whose pick
/// record says they are incomplete must be confirmed before dispatch.
/// Orders without a pick record pass.
pub fn check(selection: &SelectionSet, orders: &[Order]) -> GateDecision {
    let partially_picked: Vec<Order> = orders
        .iter()
        .filter(|order| selection.contains(&order.id) && order.is_partially_picked())
        .cloned()
        .collect();

    if partially_picked.is_empty() {
        GateDecision::Clear
    } else {
        GateDecision::NeedsConfirmation {
            orders: partially_picked,
        }
    }
}
