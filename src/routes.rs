pub mod auth;
pub mod channel;
pub mod direct;
pub mod document;
pub mod error;
pub mod friendship;
pub mod health;
pub mod message;
pub mod notification;
pub mod password_reset;
pub mod realtime;
pub mod seed;
pub mod session;
pub mod two_factor;
pub mod user;
pub mod workspace;
