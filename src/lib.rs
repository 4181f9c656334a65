//! beseda — a line-oriented multi-client chat relay.
//!
//! Clients connect over TCP, pick a display name, and every plain text line
//! they send is fanned out to all other participants with a wall-clock
//! timestamp. Slow or dead peers are evicted instead of blocking delivery.

pub mod chat;
