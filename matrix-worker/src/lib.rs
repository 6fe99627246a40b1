//! Shared pieces for the Matrix reference agent and store-process
//! binaries: the line-delimited JSON-RPC client used to talk to a
//! controller.
pub mod client;
