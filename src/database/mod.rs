pub mod repo;
pub mod schema;
pub mod store;
pub mod writer;
