// Library interface for storyletter modules
// This allows tests and other binaries to import modules

pub mod distribution;
pub mod email;
pub mod error;
pub mod generator;
pub mod llm;
pub mod metrics;
pub mod server;
pub mod storage;
