//! # Request Handling
//!
//! The handler chain a server runs for every request it decodes.

pub mod handler;
