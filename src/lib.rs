//! Offline-first mutation queue, sync engine, and read cache for field
//! clients.
//!
//! A UI (or the companion CLI) sends mutations through the
//! [`dispatch::RequestDispatcher`], which either executes them immediately or
//! parks them in the durable [`queue::WriteQueueStore`]. The
//! [`sync::SyncEngine`] replays parked writes in capture order once
//! connectivity returns, publishing affected entities on the
//! [`bus::InvalidationBus`]. Reads go through the [`cache::ReadCache`], which
//! serves the local snapshot immediately and refreshes it in the background.

pub mod api;
pub mod bootstrap;
pub mod bus;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod net;
pub mod queue;
pub mod scheduler;
pub mod sync;
