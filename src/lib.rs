//! A lottery server: agencies submit their bets in batches over TCP, and once every
//! agency is done, each of them is told which of its bets won.

pub mod bet;
pub mod client;
pub mod config;
pub mod draw;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod storage;
