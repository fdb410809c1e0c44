pub mod store;

pub use store::SqliteDataStore;
