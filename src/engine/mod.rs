pub mod coordinator;
pub mod dispatcher;
pub mod eligibility;
pub mod lifecycle;
pub mod order_book;
pub mod partial_pick;
pub mod reconciler;
pub mod selection;
pub mod session;
pub mod snapshot;
pub mod status_store;
