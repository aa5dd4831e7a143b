pub mod identity;
pub mod order;
pub mod run;
pub mod vehicle;
