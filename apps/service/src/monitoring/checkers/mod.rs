//! Built-in checkers, one per monitor type family.

pub mod dns;
pub mod group;
pub mod http;
pub mod ping;
pub mod smtp;
pub mod steam;
pub mod tcp;
