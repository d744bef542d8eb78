#![forbid(unsafe_code)]
//! compgraph-mem: memory watchdog, RAII budget guards, and spill manager.
//!
//! This crate provides the concrete implementation of the interfaces defined
//! in `compgraph-core::budget`. Sort stages charge every row they hold to a
//! watchdog guard; a refused charge is the signal to spill.
//!
//! No filesystem code lives here. A generic `Storage` trait is exposed
//! (in `spill::`) and implemented by `compgraph-io`.

pub mod error;
pub mod guard;
pub mod spill;
pub mod tracking;

pub use guard::{MemoryWatchdog, WatchdogGuard};
pub use spill::{Codec, SegmentReader, SpillHandle, SpillManager, Storage};
