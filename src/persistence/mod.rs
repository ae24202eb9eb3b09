pub mod store;
pub mod sweep;
