//! Websocket presence, typing and document relay.
//!
//! [`hub::RealtimeHub`] owns every open connection and its room memberships;
//! the websocket route only pumps frames between the socket and the hub.

pub mod events;
pub mod hub;

pub use events::{ClientEvent, ServerEvent};
pub use hub::RealtimeHub;
