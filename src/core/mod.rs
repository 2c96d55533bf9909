//! Core infrastructure shared by every command
//!
//! Terminal output and the install database lock.

pub mod lock;
pub mod output;
