//! Domain models for the permission engine.

pub mod audit;
pub mod effective;
pub mod family;
pub mod permission;
pub mod user;
pub mod version;
