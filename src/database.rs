pub mod activity;
pub mod channel;
pub mod document;
pub mod friendship;
pub mod kv;
pub mod memory_store;
pub mod message;
pub mod notification;
pub mod redis_store;
pub mod repository;
pub mod session;
pub mod tokens;
pub mod two_factor;
pub mod user;
pub mod workspace;
