// Infrastructure layer - External dependencies and adapters
pub mod backend_client;
pub mod config;
pub mod file_store;
pub mod memory_store;
