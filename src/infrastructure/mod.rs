pub mod config;
pub mod error;
pub mod persistence;
pub mod storage;
