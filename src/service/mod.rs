//! # Services
//!
//! The two ends of an SBTP exchange.
//!
//! ## Components
//! - **Client**: one outbound connection, one request in flight at a time
//! - **Server**: accept loop plus one serving task per connection

pub mod client;
pub mod server;
