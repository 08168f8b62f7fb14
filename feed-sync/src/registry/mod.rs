pub mod memory;
pub mod postgres;

pub use memory::MemorySourceRegistry;
pub use postgres::PgSourceRegistry;
