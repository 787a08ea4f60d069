pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod index;
pub mod indexer;
pub mod model;
pub mod rpc;
pub mod summarize;
pub mod trace;
pub mod util;
pub mod watch;
