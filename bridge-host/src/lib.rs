//! # bridge-host
//!
//! Host side of the interwork plugin bridge.
//!
//! The host owns a local [`EventHub`](hub::EventHub). An out-of-process
//! extension registers handlers through the [`HostEventAdapter`](adapter::HostEventAdapter),
//! which subscribes forwarding closures to the hub. When a local event fires,
//! each closure calls back into the extension and applies the result to the
//! local event.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────── bridge-host ────────────────────────────┐
//! │                                                                      │
//! │  stdin / host sources ──▶ EventHub ──▶ forwarding closures ──────────┼──▶ extension
//! │                              ▲                                       │    callback.*
//! │                              │ subscribe                             │
//! │                     DeferredRegistrationQueue                        │
//! │                              ▲                                       │
//! │  context.* ◀── HostEventAdapter ◀── register_handler ────────────────┼─── extension
//! │                              │                                       │
//! │                        HostServices                                  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod adapter;
pub mod client;
pub mod config;
pub mod console;
pub mod deferred;
pub mod hub;
pub mod services;
