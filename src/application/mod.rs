// Application layer - Use cases and the ports they depend on
pub mod backend_api;
pub mod dashboard_controller;
pub mod dashboard_service;
pub mod instance_store;
pub mod key_value_store;
pub mod layout_persistence;
pub mod layout_writer;
pub mod refresh;
pub mod registry;
