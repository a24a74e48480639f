//! Data layer record contracts
//!
//! Every well-known event category promises a minimum attribute set. The
//! contracts here are what downstream tag configuration relies on; they are
//! checked by tests and by `tagpulse validate`.

mod contract;

pub use contract::*;
