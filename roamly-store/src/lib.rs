pub mod app_config;
pub mod database;
pub mod memory;
pub mod pg_store;

pub use app_config::Config;
pub use database::DbClient;
pub use memory::InMemoryBookingStore;
pub use pg_store::PgBookingStore;
