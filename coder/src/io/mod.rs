//! Side-effecting adapters: filesystem stores, git, subprocesses and the model server.

pub mod artifacts;
pub mod config;
pub mod event_log;
pub mod file_context;
pub mod generator;
pub mod git;
pub mod init;
pub mod patch;
pub mod process;
pub mod state_store;
pub mod task_store;
