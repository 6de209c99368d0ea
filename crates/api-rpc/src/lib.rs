//! JSON-RPC API Layer
//!
//! JSON-RPC 2.0 control surface for the simulation runner: spawn, kill,
//! status, list, send, and a per-simulation message subscription.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use handler::RpcHandler;
pub use server::{RpcServer, RpcServerConfig};
