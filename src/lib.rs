pub mod agent;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod http;
pub mod llm_client;
pub mod sandbox;
pub mod session;
pub mod tool_registry;
pub mod tools;
pub mod types;
pub mod utils;

#[cfg(test)]
mod mocks;
#[cfg(test)]
mod tests;
