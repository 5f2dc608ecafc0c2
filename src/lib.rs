#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # xdnd-engine: drag'n'drop between X11 clients
//!
//! This crate implements the XDND protocol (version 5), the drag'n'drop protocol spoken by X11
//! toolkits, for both roles a process can take during a drag: the drag source and the drop target.
//!
//! ## Structure of the crate
//!
//! - [`xdnd`] contains the engine itself: the source and target state machines, the resolution
//!   of the window under the pointer, the bookkeeping of drops waiting to be finished and the data
//!   transfers through the `XdndSelection`.
//! - [`backend`] contains the [`WindowSystem`](backend::WindowSystem) abstraction the engine talks
//!   to, with an implementation on top of [`x11rb`](https://docs.rs/x11rb) and an in-memory one
//!   for testing.
//! - [`utils`] contains geometry types and the monotonic clock used for timeouts.
//!
//! ## The event loop
//!
//! The engine does not own an event loop. It is fed window-system events and pointer motion by
//! the embedding application and reports back through the [`XdndHandler`](xdnd::XdndHandler)
//! trait. Timeouts are requested through an [`EngineTimer`](xdnd::EngineTimer), for which
//! [`CalloopTimer`](xdnd::CalloopTimer) provides an implementation on top of a [`calloop`] event
//! loop.
//!
//! ### Logging
//!
//! This crate makes extensive use of [`tracing`] for its internal logging.
//!
//! For release builds it is recommended to limit the log level during compile time.
//! This can be done by adding a dependency to [`tracing`] and enabling the corresponding features.
//! For example to enable `trace` messages for debug builds, but limit release builds to `debug` add
//! the following in your binary crate `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tracing = { version = "0.1", features = ["max_level_trace", "release_max_level_debug"] }
//! ```
//!
//! If you do not want to use [`tracing`], refer to [`log compatibility`](tracing#log-compatibility)
//! for how to forward the debug output to other `log` compatible frameworks.

pub mod backend;
pub mod utils;
pub mod xdnd;
