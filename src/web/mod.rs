//! HTTP facade over the engine
//!
//! Transport-agnostic in spirit: handlers only translate between wire
//! models and engine calls. Everything interesting happens behind the
//! node's lock.

pub mod handlers;
pub mod models;
pub mod server;

pub use server::WebServer;
