pub mod block_store;
pub mod bootstrap;
pub mod commands;
pub mod focus_controller;
pub mod focus_mode;
pub mod summary;
