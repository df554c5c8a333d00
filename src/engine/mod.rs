//! # TimeStore storage engine
//!
//! This module implements the on-disk storage engine for fixed-grid,
//! multi-metric time series: the node lifecycle (`create`/`open`/`close`/
//! `delete`), the layered update pipeline (pad → merge-write → decimate →
//! recurse), and the range-query read pipeline.
//!
//! ## Design Overview
//!
//! A node owns one memory-mapped [`metadata`](crate::metadata) record and up
//! to [`MAX_LAYERS`](crate::metadata::MAX_LAYERS) flat [`layer`](crate::layer)
//! files, each coarser than the last by its configured decimation factor.
//! Writing a point at layer 0 cascades: pad any gap since the last write,
//! merge-write the target row (never clobbering metrics the caller didn't
//! supply), then — if the layer has a decimation factor — aggregate the
//! affected window and recurse into the next layer. The cascade is iterative,
//! not recursive, so its depth never couples to the call stack.
//!
//! ## Concurrency Model
//!
//! Each [`Context`] owns exactly one `Mutex<ContextInner>`. Every operation
//! — reads included — acquires it for its full duration: the working set is
//! small, every operation already bottlenecks on positioned file I/O, and
//! fine-grained locking would only add complexity for no throughput gain.
//!
//! A process-wide registry interns `Context`s by `(data_dir, node_id)` so
//! that two calls to [`open`] for the same node return the same handle
//! rather than mapping the metadata file twice, which the on-disk format
//! has no way to detect or prevent on its own.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once, OnceLock, Weak};

use tracing::{debug, info, warn};

use crate::error::TimeStoreError;
use crate::layer::LayerFile;
use crate::metadata::{CreateParams, KeySlot, MetadataStore, KEY_LENGTH, MAX_KEYS, MAX_LAYERS};
use crate::modes::{self, DownsampleMode, MetricFlags, PadMode};

#[cfg(test)]
mod tests;

/// Sentinel timestamp meaning "no such time" or "use the node's default range".
pub const NO_TIMESTAMP: i64 = i64::MAX;

fn metadata_path(data_dir: &Path, node_id: u64) -> PathBuf {
    data_dir.join(format!("{node_id:016X}.tsdb"))
}

fn layer_path(data_dir: &Path, node_id: u64, layer: usize) -> PathBuf {
    data_dir.join(format!("{node_id:016X}_{layer}_.dat"))
}

/// One emitted `(timestamp, value)` pair from [`Context::get_series`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    pub timestamp: i64,
    pub value: f64,
}

type RegistryKey = (PathBuf, u64);
type Registry = Mutex<HashMap<RegistryKey, Weak<Context>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Creates a fresh node: writes its metadata record and nothing else. Layer
/// files are created lazily the first time the node is opened.
///
/// Fails with [`TimeStoreError::AlreadyExists`] if `node_id` already has
/// metadata in `data_dir`.
pub fn create(
    data_dir: &Path,
    node_id: u64,
    interval: u32,
    metric_flags: &[MetricFlags],
    decimation: &[u32],
) -> Result<(), TimeStoreError> {
    fs::create_dir_all(data_dir)?;
    let path = metadata_path(data_dir, node_id);
    let params = CreateParams {
        node_id,
        interval,
        nmetrics: metric_flags.len() as u32,
        flags: metric_flags,
        decimation,
    };
    MetadataStore::create(&path, &params)?;
    Ok(())
}

/// Deletes a node's metadata and layer files.
///
/// Mirrors the cleanup order of the on-disk format this engine is
/// compatible with: the metadata file is removed first, then layer files
/// `0..MAX_LAYERS` in order, stopping at the first one that doesn't exist
/// (layers beyond the configured decimation chain were never created).
pub fn delete(data_dir: &Path, node_id: u64) -> Result<(), TimeStoreError> {
    let meta_path = metadata_path(data_dir, node_id);
    fs::remove_file(&meta_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            TimeStoreError::NotFound(format!("node {node_id:016X}"))
        } else {
            TimeStoreError::Io(e)
        }
    })?;

    for layer in 0..MAX_LAYERS {
        let path = layer_path(data_dir, node_id, layer);
        if fs::remove_file(&path).is_err() {
            break;
        }
    }
    info!(node_id = %format!("{node_id:016X}"), "deleted node");
    Ok(())
}

/// Opens a node, returning a shared handle.
///
/// A second `open` for the same `(data_dir, node_id)` pair in this process
/// returns the same [`Context`] rather than mapping the metadata file again
/// — two independent mappings of the same node would race on `npoints`/
/// `start_time` with no way for either side to detect the other.
pub fn open(data_dir: &Path, node_id: u64) -> Result<Arc<Context>, TimeStoreError> {
    let key: RegistryKey = (data_dir.to_path_buf(), node_id);

    {
        let reg = registry().lock().map_err(|_| poisoned())?;
        if let Some(weak) = reg.get(&key)
            && let Some(ctx) = weak.upgrade()
        {
            debug!(node_id = %format!("{node_id:016X}"), "reusing interned context");
            return Ok(ctx);
        }
    }

    let meta_path = metadata_path(data_dir, node_id);
    let metadata = MetadataStore::open(&meta_path, node_id)?;
    let nmetrics = metadata.nmetrics() as usize;
    // One layer file per decimation step, plus the finest-grained layer 0
    // itself; `create` rejects chains that would need more than MAX_LAYERS,
    // the `.min` is just a guard against a hand-edited or corrupt header.
    let layer_count = (metadata.decimation_chain().len() + 1).min(MAX_LAYERS);

    let mut layers = Vec::with_capacity(layer_count);
    for layer in 0..layer_count {
        let path = layer_path(data_dir, node_id, layer);
        layers.push(LayerFile::open_or_create(&path, nmetrics)?);
    }

    let inner = ContextInner { metadata, layers };

    let ctx = Arc::new(Context {
        node_id,
        nmetrics,
        inner: Mutex::new(inner),
        reserved_aggregate_logged: Once::new(),
    });

    let mut reg = registry().lock().map_err(|_| poisoned())?;
    // Another thread may have won the race while we were opening; prefer
    // the winner so there is still exactly one live context per node.
    match reg.get(&key).and_then(Weak::upgrade) {
        Some(existing) => Ok(existing),
        None => {
            reg.insert(key, Arc::downgrade(&ctx));
            info!(node_id = %format!("{node_id:016X}"), nmetrics, "opened node");
            Ok(ctx)
        }
    }
}

fn poisoned() -> TimeStoreError {
    TimeStoreError::Internal("context mutex poisoned".into())
}

struct ContextInner {
    metadata: MetadataStore,
    layers: Vec<LayerFile>,
}

/// A single node's exclusive handle: open file descriptors, mapped metadata,
/// and the mutex serializing every operation against them.
///
/// `Context`s are interned process-wide by `(data_dir, node_id)` via [`open`]
/// and reference-counted; the underlying files are closed when the last
/// `Arc<Context>` is dropped.
pub struct Context {
    node_id: u64,
    nmetrics: usize,
    inner: Mutex<ContextInner>,
    /// Guards the one-shot warning for reserved (Median/Mode) downsample modes.
    reserved_aggregate_logged: Once,
}

impl Context {
    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    pub fn nmetrics(&self) -> usize {
        self.nmetrics
    }

    /// Returns the timestamp of the most recent point, or [`NO_TIMESTAMP`]
    /// if the node has never been written to.
    pub fn get_latest(&self) -> Result<i64, TimeStoreError> {
        let inner = self.inner.lock().map_err(|_| poisoned())?;
        Ok(Self::latest_locked(&inner))
    }

    fn latest_locked(inner: &ContextInner) -> i64 {
        let npoints = inner.metadata.npoints();
        if npoints == 0 {
            NO_TIMESTAMP
        } else {
            inner.metadata.start_time() + i64::from(npoints - 1) * i64::from(inner.metadata.interval())
        }
    }

    /// Writes `values` (one per metric, in metric order; `NaN` to leave a
    /// metric untouched) at `t`, rounded down to the nearest interval
    /// boundary. Returns the rounded timestamp actually written.
    ///
    /// Gaps since the last write are padded per each metric's pad mode.
    /// Decimated layers above layer 0 are recomputed for every affected row.
    pub fn update_values(&self, t: i64, values: &[f64]) -> Result<i64, TimeStoreError> {
        if values.len() != self.nmetrics {
            return Err(TimeStoreError::Invalid(format!(
                "expected {} values, got {}",
                self.nmetrics,
                values.len()
            )));
        }

        let mut inner = self.inner.lock().map_err(|_| poisoned())?;
        let interval = i64::from(inner.metadata.interval());
        let t = t.div_euclid(interval) * interval;

        let npoints = inner.metadata.npoints();
        if npoints == 0 {
            inner.metadata.set_start_time(t);
        } else if t < inner.metadata.start_time() {
            return Err(TimeStoreError::OutOfRange(format!(
                "timestamp {t} precedes node start_time {}",
                inner.metadata.start_time()
            )));
        }

        let start_time = inner.metadata.start_time();
        let point = ((t - start_time) / interval) as u64;

        self.update_layer_chain(&mut inner, point, values.to_vec())?;

        if point >= u64::from(npoints) {
            inner.metadata.set_npoints((point + 1) as u32);
        }
        inner.metadata.flush_async()?;
        debug!(node_id = %format!("{:016X}", self.node_id), t, point, "update_values committed");
        Ok(t)
    }

    /// Iterative pad → merge-write → decimate → recurse cascade over the
    /// layer chain, starting at layer 0.
    fn update_layer_chain(
        &self,
        inner: &mut ContextInner,
        point: u64,
        mut values: Vec<f64>,
    ) -> Result<(), TimeStoreError> {
        let chain = inner.metadata.decimation_chain();
        let flags: Vec<MetricFlags> = (0..self.nmetrics)
            .map(|m| inner.metadata.metric_flags(m))
            .collect();

        let mut layer = 0usize;
        let mut p = point;

        loop {
            let n = inner.layers[layer].row_count()?;

            if p > n {
                self.pad_gap(inner, layer, &flags, n, p)?;
            }

            let existing = inner.layers[layer].read_row(p)?;
            let fresh_row = p >= n;
            let merged = merge_row(existing.as_deref(), &values, fresh_row);
            inner.layers[layer].write_row(p, &merged)?;

            let decimation = chain.get(layer).copied().unwrap_or(0);
            if decimation == 0 {
                break;
            }
            let d = u64::from(decimation);
            let window_start = (p / d) * d;
            let window = inner.layers[layer].read_window(window_start, d)?;

            let mut aggregated = vec![0.0f64; self.nmetrics];
            for (m, slot) in aggregated.iter_mut().enumerate() {
                let ds_mode = flags[m].downsample;
                if ds_mode.is_reserved_aggregate() {
                    self.log_reserved_aggregate_once(ds_mode);
                }
                *slot = modes::aggregate(ds_mode, window.iter().map(|row| row[m]));
            }

            p /= d;
            layer += 1;
            values = aggregated;
        }

        Ok(())
    }

    fn pad_gap(
        &self,
        inner: &mut ContextInner,
        layer: usize,
        flags: &[MetricFlags],
        from: u64,
        to: u64,
    ) -> Result<(), TimeStoreError> {
        let mut pad_row = vec![f64::NAN; self.nmetrics];
        for (m, flag) in flags.iter().enumerate() {
            if flag.pad == PadMode::Last {
                pad_row[m] = inner.layers[layer].last_valid_value(m, from)?;
            }
        }
        inner.layers[layer].pad_uniform(from, to, &pad_row)?;
        Ok(())
    }

    fn log_reserved_aggregate_once(&self, mode: DownsampleMode) {
        self.reserved_aggregate_logged.call_once(|| {
            warn!(
                node_id = %format!("{:016X}", self.node_id),
                ?mode,
                "downsample mode is reserved and not numerically implemented; emitting NaN"
            );
        });
    }

    /// Returns the row at `t` (rounded down to the interval), rejecting
    /// timestamps before `start_time` or beyond the last written point.
    pub fn get_values(&self, t: i64) -> Result<(i64, Vec<f64>), TimeStoreError> {
        let mut inner = self.inner.lock().map_err(|_| poisoned())?;
        let interval = i64::from(inner.metadata.interval());
        let t = t.div_euclid(interval) * interval;

        let start_time = inner.metadata.start_time();
        let npoints = inner.metadata.npoints();
        if npoints == 0 || t < start_time {
            return Err(TimeStoreError::OutOfRange(format!(
                "timestamp {t} precedes node start_time"
            )));
        }
        let point = ((t - start_time) / interval) as u64;
        if point >= u64::from(npoints) {
            return Err(TimeStoreError::OutOfRange(format!(
                "timestamp {t} is beyond the last written point"
            )));
        }

        let row = inner.layers[0]
            .read_row(point)?
            .unwrap_or_else(|| vec![f64::NAN; self.nmetrics]);
        Ok((t, row))
    }

    /// Returns up to `npoints` `(timestamp, value)` pairs for `metric_id`
    /// spanning `[start, end)`, selecting the coarsest layer whose native
    /// interval still resolves the requested step, and averaging across
    /// whichever finer rows fall within each output step.
    pub fn get_series(
        &self,
        metric_id: usize,
        start: i64,
        end: i64,
        npoints: usize,
    ) -> Result<Vec<SeriesPoint>, TimeStoreError> {
        let mut inner = self.inner.lock().map_err(|_| poisoned())?;

        if metric_id >= self.nmetrics {
            return Err(TimeStoreError::NotFound(format!(
                "metric {metric_id} (nmetrics = {})",
                self.nmetrics
            )));
        }

        let interval = i64::from(inner.metadata.interval());
        let start_time = inner.metadata.start_time();
        let npoints_layer0 = u64::from(inner.metadata.npoints());

        let start = if start == NO_TIMESTAMP { start_time } else { start };
        let end = if end == NO_TIMESTAMP {
            start_time + (npoints_layer0 as i64) * interval
        } else {
            end
        };

        if end < start {
            return Err(TimeStoreError::Invalid(format!(
                "end {end} precedes start {start}"
            )));
        }
        if npoints == 0 {
            return Ok(Vec::new());
        }

        let span = end - start;
        let (npoints, out_interval) = if span < npoints as i64 {
            (span.max(0) as usize, 1)
        } else {
            (npoints, span / npoints as i64)
        };
        if npoints == 0 {
            return Ok(Vec::new());
        }

        let chain = inner.metadata.decimation_chain();
        let mut layer = 0usize;
        let mut layer_interval = interval;
        while let Some(&d) = chain.get(layer) {
            let d = i64::from(d);
            if layer_interval * d > out_interval {
                break;
            }
            layer_interval *= d;
            layer += 1;
        }

        let naverage = (out_interval / layer_interval).max(1) as u64;

        debug!(
            node_id = %format!("{:016X}", self.node_id),
            metric_id, layer, layer_interval, naverage, out_interval,
            "get_series layer selection"
        );

        let layer_row_count = inner.layers[layer].row_count()?;
        let mut out = Vec::with_capacity(npoints);

        for k in 0..npoints {
            let t = start + (k as i64) * out_interval;
            if t < start_time || t >= start_time + (npoints_layer0 as i64) * interval {
                continue;
            }
            let layer_point = ((t - start_time) / layer_interval) as u64;
            if layer_point >= layer_row_count {
                continue;
            }
            let window = inner.layers[layer].read_window(layer_point, naverage)?;
            let (sum, count) = window
                .iter()
                .map(|row| row[metric_id])
                .filter(|v| !v.is_nan())
                .fold((0.0f64, 0u32), |(sum, count), v| (sum + v, count + 1));
            if count == 0 {
                continue;
            }
            out.push(SeriesPoint {
                timestamp: t,
                value: sum / f64::from(count),
            });
        }

        Ok(out)
    }

    /// Returns the value stored in key slot `slot`, or `NotFound` if the
    /// slot is not in use.
    pub fn get_key(&self, slot: usize) -> Result<[u8; KEY_LENGTH], TimeStoreError> {
        if slot >= MAX_KEYS {
            return Err(TimeStoreError::Invalid(format!("key slot {slot} out of range")));
        }
        let inner = self.inner.lock().map_err(|_| poisoned())?;
        let KeySlot { in_use, value } = inner.metadata.key_slot(slot);
        if in_use {
            Ok(value)
        } else {
            Err(TimeStoreError::NotFound(format!("key slot {slot} not set")))
        }
    }

    /// Sets (or, with `None`, clears) key slot `slot`.
    pub fn set_key(&self, slot: usize, value: Option<&[u8; KEY_LENGTH]>) -> Result<(), TimeStoreError> {
        if slot >= MAX_KEYS {
            return Err(TimeStoreError::Invalid(format!("key slot {slot} out of range")));
        }
        let mut inner = self.inner.lock().map_err(|_| poisoned())?;
        inner.metadata.set_key_slot(slot, value);
        inner.metadata.flush_async()?;
        Ok(())
    }
}

/// Read-modify-write merge of an incoming row onto the existing row at the
/// same index. `NaN` entries in `values` keep the existing value; for a
/// freshly appended row (`fresh_row`, no existing data) a skipped metric is
/// initialized to `NaN` rather than left uninitialized — the fix for the
/// seek-skip writer defect the pad-mode design note calls out.
fn merge_row(existing: Option<&[f64]>, values: &[f64], fresh_row: bool) -> Vec<f64> {
    match existing {
        Some(existing) => values
            .iter()
            .zip(existing)
            .map(|(&new, &old)| if new.is_nan() { old } else { new })
            .collect(),
        None => {
            debug_assert!(fresh_row);
            values.to_vec()
        }
    }
}
