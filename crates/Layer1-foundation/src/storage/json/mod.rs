//! JSON 저장소

mod store;

pub use store::JsonStore;
