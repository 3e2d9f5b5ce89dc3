//! torrentfs — a read-only, POSIX-like filesystem over an in-progress
//! BitTorrent swarm.
//!
//! A daemon (`torrentfsd`) loads `.torrent` files from a watched directory,
//! tracks each torrent's path index and piece availability, and serves
//! reads, listings, and pin/prefetch commands over a local length-prefixed
//! JSON RPC socket. A thin CLI (`torrentfs`) and FUSE driver
//! (`torrentfs-fuse`) are separate, much smaller binaries layered on top of
//! the same RPC protocol.
//!
//! # Architecture
//!
//! - [`session`] is the trait boundary to the underlying BitTorrent session
//!   (piece priorities, deadlines, alerts, resume data); [`session::memory`]
//!   ships a deterministic in-process implementation for tests and fixture
//!   runs.
//! - [`path_index`] maps torrent-relative paths to file entries and byte
//!   ranges to piece ranges.
//! - [`read_scheduler`] implements the priority/deadline/wait protocol that
//!   backs the `read` command.
//! - [`prefetch`] and [`pin_store`] implement the two ways a file's pieces
//!   get proactively raised in priority.
//! - [`engine`] composes all of the above per torrent; [`manager`] owns the
//!   registry of engines and the `torrent` field resolution rule.
//! - [`watcher`] polls the watched directory for `.torrent` files.
//! - [`codec`] and [`rpc`] implement the wire protocol and command dispatch.
//!
//! # Blocking behavior
//!
//! The only suspension points are inside `read` (waiting for pieces) and
//! inside prefetch scans (paced by configured sleeps). Every other command
//! is non-blocking or bounded by a single registry lookup. A slow `read` on
//! one RPC connection never delays another connection; see [`rpc::server`].

pub mod cache_manager;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod manager;
pub mod path_index;
pub mod pin_store;
pub mod prefetch;
pub mod read_scheduler;
pub mod rpc;
pub mod session;
pub mod watcher;

pub use error::{Result, TorrentFsError};
