pub mod auth;
pub mod email;
pub mod notification;
pub mod seed;
