//! Gate.io USDT-settled futures connectivity.

mod client;
pub mod types;

pub use client::{to_contract_name, GateClient};
