//! # TimeStore
//!
//! A lightweight, file-backed storage engine for fixed-grid, multi-metric
//! time series data (sensor/telemetry-style numeric samples). Each node
//! owns an interleaved table of `f64` samples on a regular time grid, plus
//! automatically maintained, progressively coarser downsampled layers —
//! round-robin-archive style, but append-biased and friendly to sparse
//! updates.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      Context                          │
//! │  ┌────────────┐   ┌────────────────────────────────┐ │
//! │  │  metadata  │   │  layers[0..MAX_LAYERS]          │ │
//! │  │  (mmap)    │   │  layer 0: finest, layer N: coarsest │
//! │  └─────┬──────┘   └──────┬─────────────────────────┘ │
//! │        │ npoints,        │ pad → merge-write →       │
//! │        │ start_time      │ decimate → recurse        │
//! │        └────────►        └───────────────────────────┘│
//! │  Guarded end-to-end by a single `Mutex<ContextInner>` │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Node lifecycle and the update/read pipelines — the public API |
//! | [`metadata`] | Fixed-layout, memory-mapped node header |
//! | [`layer`] | One resolution tier's flat row file |
//! | [`modes`] | Padding and downsampling mode tags, plus aggregation |
//! | [`error`] | Crate-wide error types |
//!
//! ## Key Properties
//!
//! - **Wire-exact metadata layout** — the on-disk header is a fixed,
//!   little-endian byte layout, not a serialized Rust type.
//! - **Read-modify-write updates** — a write to one metric never corrupts or
//!   uninitializes another metric's value in the same row.
//! - **Missing-value semantics** — `NaN` means "no sample"; aggregation and
//!   padding both treat it as absent rather than zero.
//! - **Single mutex per node** — every operation on a [`engine::Context`]
//!   serializes through one lock; there is no finer-grained locking to
//!   reason about.
//! - **Process-wide interning** — [`engine::open`] hands back the same
//!   [`engine::Context`] to every caller in the process for a given node,
//!   so two independent memory maps of the same metadata file can't race.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use timestore::engine;
//! use timestore::modes::{DownsampleMode, MetricFlags, PadMode};
//! use std::path::Path;
//!
//! let data_dir = Path::new("/tmp/timestore-demo");
//! let flags = vec![MetricFlags::new(PadMode::Unknown, DownsampleMode::Mean)];
//!
//! engine::create(data_dir, 0x00CAFE, 30, &flags, &[2]).unwrap();
//! let ctx = engine::open(data_dir, 0x00CAFE).unwrap();
//!
//! ctx.update_values(0, &[10.0]).unwrap();
//! let (t, row) = ctx.get_values(0).unwrap();
//! assert_eq!(row, vec![10.0]);
//! assert_eq!(ctx.get_latest().unwrap(), t);
//!
//! engine::delete(data_dir, 0x00CAFE).unwrap();
//! ```

#![allow(dead_code)]

pub mod engine;
pub mod error;
pub mod layer;
pub mod metadata;
pub mod modes;
