//! # dabc_monitor
//!
//! dabc_monitor is a monitoring client for DABC data acquisition servers,
//! written in Rust. It synchronizes the server's item hierarchy over HTTP,
//! fetches versioned binary objects, rate and log histories, and images, and
//! hands everything that changed to a pluggable renderer. The heavy lifting of
//! drawing is deliberately out of scope; the library owns the protocol.
//!
//! ## Installation
//!
//! In the future we may deploy to crates.io, but currently the only method of
//! install is from source, which is laid out below.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the
//! Rust tool chain. See the [Rust docs](https://www.rust-lang.org/tools/install)
//! for installation instructions.
//!
//! ### Downloading
//!
//! To download dabc_monitor clone the git repository using
//! `git clone https://github.com/dabc-daq/dabc_monitor.git`
//!
//! ### Building & Install
//!
//! To build and install the CLI monitor use `cargo install --path ./dabc_monitor_cli`
//! from the top level dabc_monitor repository.
//!
//! ## Configuration
//!
//! The YAML format of a configuration file is as follows:
//!
//! ```yml
//! server_url: http://localhost:8090
//! poll_interval_ms: 1000
//! history_limit: 100
//! expand_ceiling: 200
//! monitoring: true
//! n_workers: 2
//! compact: 3
//! ```
//!
//! - `server_url`: Base URL of the DABC web server.
//! - `poll_interval_ms`: Delay between regular-check ticks.
//! - `history_limit`: Number of trailing history entries kept per item.
//! - `expand_ceiling`: Rough upper bound on rendered tree entries; deeper
//!   levels collapse behind placeholders expanded on demand.
//! - `monitoring`: When true, displayed items are re-fetched on every tick;
//!   when false, items are fetched once and only refreshed on demand.
//! - `n_workers`: Number of HTTP worker threads.
//! - `compact`: Compactness level passed to the hierarchy endpoint.
//!
//! ## Protocol
//!
//! The client speaks the DABC web server protocol: `h.json?compact=N` for the
//! (possibly truncated) hierarchy description, `getbinary?version=N` for
//! framed binary objects, `gethistory?limit=M&version=N` for history batches,
//! `get.json` for field snapshots and command descriptors, and `execute?...`
//! for command invocation. Binary replies carry a little-endian header with
//! the object version, the schema ("master") version the payload requires,
//! and an optional zlib-compressed body. An object is never decoded against a
//! schema older than its requirement; such payloads wait until the schema
//! record catches up.
pub mod binary;
pub mod command;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod history;
pub mod item;
pub mod manager;
pub mod object;
pub mod render;
pub mod transport;
pub mod tree;
pub mod value;
