//! Care Gateway: caller identity verification for a clinic voice line.

pub mod config;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod routes;
pub mod routing;
pub mod safety;
pub mod verification;
