//! Wire and domain types shared by the ChainGrid auth crates.

pub mod api;
pub mod models;
