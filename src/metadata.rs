//! Fixed-layout, memory-mapped node metadata.
//!
//! The on-disk metadata record is a flat, little-endian byte layout (see
//! module-level offset constants below) — not a Rust `#[repr(C)]` struct
//! reinterpreted via pointer cast. Every field is read and written through
//! explicit byte-slice encode/decode calls into the mapped region, which
//! keeps the format independent of host endianness and struct layout rules
//! and avoids undefined behavior from casting a `&mut [u8]` to a typed
//! pointer of unknown alignment.

use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::{MmapMut, MmapOptions};
use tracing::{debug, info};

use crate::error::MetadataError;
use crate::modes::MetricFlags;

pub const MAGIC: u32 = 0x4244_5354;
pub const VERSION: u32 = 0;

pub const MAX_METRICS: usize = 32;
pub const MAX_LAYERS: usize = 8;
pub const MAX_KEYS: usize = 2;
pub const KEY_LENGTH: usize = 32;

/// Index of the read-key slot, matching the original's `tsdbKey_Read`.
pub const KEY_SLOT_READ: usize = 0;
/// Index of the write-key slot, matching the original's `tsdbKey_Write`.
pub const KEY_SLOT_WRITE: usize = 1;

const KEY_IN_USE: u32 = 1 << 0;

const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = OFF_MAGIC + 4;
const OFF_NODE_ID: usize = OFF_VERSION + 4;
const OFF_NMETRICS: usize = OFF_NODE_ID + 8;
const OFF_NPOINTS: usize = OFF_NMETRICS + 4;
const OFF_START_TIME: usize = OFF_NPOINTS + 4;
const OFF_INTERVAL: usize = OFF_START_TIME + 8;
const OFF_DECIMATION: usize = OFF_INTERVAL + 4;
const OFF_FLAGS: usize = OFF_DECIMATION + MAX_LAYERS * 4;
const OFF_KEYS: usize = OFF_FLAGS + MAX_METRICS * 4;

const KEY_RECORD_SIZE: usize = 4 + KEY_LENGTH;

/// Total size in bytes of the fixed metadata record, including key slots.
pub const METADATA_SIZE: usize = OFF_KEYS + MAX_KEYS * KEY_RECORD_SIZE;

/// A single HMAC-style opaque secret slot, with its in-use bit.
#[derive(Debug, Clone)]
pub struct KeySlot {
    pub in_use: bool,
    pub value: [u8; KEY_LENGTH],
}

/// Caller-supplied parameters for a brand-new node, validated by [`MetadataStore::create`].
pub struct CreateParams<'a> {
    pub node_id: u64,
    pub interval: u32,
    pub nmetrics: u32,
    pub flags: &'a [MetricFlags],
    pub decimation: &'a [u32],
}

/// Memory-mapped view of a node's metadata file.
///
/// Owns the open file descriptor and the mutable mapping. All mutation goes
/// through explicit setter methods that write into the mapped bytes and can
/// be followed by [`MetadataStore::flush_async`]; there is no direct access
/// to the underlying map from outside this module.
pub struct MetadataStore {
    _file: File,
    map: MmapMut,
}

impl MetadataStore {
    /// Writes a fresh metadata record for `node_id` at `path`.
    ///
    /// Fails with `AlreadyExists` if `path` already exists (the file is
    /// opened with `create_new`, which is atomic at the filesystem level).
    pub fn create(path: &Path, params: &CreateParams) -> Result<(), MetadataError> {
        if params.nmetrics as usize > MAX_METRICS {
            return Err(MetadataError::Invalid("nmetrics exceeds MAX_METRICS"));
        }
        if params.interval == 0 {
            return Err(MetadataError::Invalid("interval must be non-zero"));
        }
        if params.flags.len() != params.nmetrics as usize {
            return Err(MetadataError::Invalid(
                "flags array length must equal nmetrics",
            ));
        }
        // A decimation chain of length N needs N+1 layer files (N decimated
        // layers plus the finest-grained layer 0), so the chain itself must
        // leave room for that extra layer.
        if params.decimation.len() >= MAX_LAYERS {
            return Err(MetadataError::Invalid(
                "decimation chain leaves no room for MAX_LAYERS layer files",
            ));
        }
        // The chain's length is its own terminator — a zero entry partway
        // through (e.g. `[2, 0, 4]`) would leave layers after it unreachable.
        if params.decimation.iter().any(|&d| d == 0) {
            return Err(MetadataError::Invalid(
                "decimation chain must not contain a zero entry",
            ));
        }

        let mut buf = vec![0u8; METADATA_SIZE];
        buf[OFF_MAGIC..OFF_MAGIC + 4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[OFF_VERSION..OFF_VERSION + 4].copy_from_slice(&VERSION.to_le_bytes());
        buf[OFF_NODE_ID..OFF_NODE_ID + 8].copy_from_slice(&params.node_id.to_le_bytes());
        buf[OFF_NMETRICS..OFF_NMETRICS + 4].copy_from_slice(&params.nmetrics.to_le_bytes());
        // npoints = 0, start_time left as 0 until the first write sets it.
        buf[OFF_INTERVAL..OFF_INTERVAL + 4].copy_from_slice(&params.interval.to_le_bytes());

        for (i, &d) in params.decimation.iter().enumerate() {
            let off = OFF_DECIMATION + i * 4;
            buf[off..off + 4].copy_from_slice(&d.to_le_bytes());
        }
        for (i, &f) in params.flags.iter().enumerate() {
            let off = OFF_FLAGS + i * 4;
            buf[off..off + 4].copy_from_slice(&f.to_word().to_le_bytes());
        }
        // Key slots start unused (flags = 0, value = zeroed) — leave as zeroed.

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    MetadataError::AlreadyExists(params.node_id)
                } else {
                    MetadataError::Io(e)
                }
            })?;
        use std::io::Write;
        (&file).write_all(&buf)?;
        file.sync_all()?;

        info!(node_id = %format!("{:016X}", params.node_id), nmetrics = params.nmetrics, interval = params.interval, "created node metadata");
        Ok(())
    }

    /// Opens an existing metadata file, maps it read-write, and validates
    /// `magic`/`version`/`node_id`/file size.
    pub fn open(path: &Path, expected_node_id: u64) -> Result<Self, MetadataError> {
        let file = OpenOptions::new().read(true).write(true).open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MetadataError::NotFound(expected_node_id)
            } else {
                MetadataError::Io(e)
            }
        })?;

        let len = file.metadata()?.len();
        if len != METADATA_SIZE as u64 {
            return Err(MetadataError::Corrupt(expected_node_id, "unexpected file size"));
        }

        let map = unsafe { MmapOptions::new().map_mut(&file)? };

        let store = Self { _file: file, map };

        if store.magic() != MAGIC {
            return Err(MetadataError::Corrupt(expected_node_id, "bad magic"));
        }
        if store.version() != VERSION {
            return Err(MetadataError::Corrupt(expected_node_id, "unsupported version"));
        }
        if store.node_id() != expected_node_id {
            return Err(MetadataError::Corrupt(expected_node_id, "node id mismatch"));
        }

        debug!(node_id = %format!("{:016X}", expected_node_id), "opened node metadata");
        Ok(store)
    }

    fn u32_at(&self, off: usize) -> u32 {
        u32::from_le_bytes(self.map[off..off + 4].try_into().unwrap())
    }

    fn u64_at(&self, off: usize) -> u64 {
        u64::from_le_bytes(self.map[off..off + 8].try_into().unwrap())
    }

    fn i64_at(&self, off: usize) -> i64 {
        i64::from_le_bytes(self.map[off..off + 8].try_into().unwrap())
    }

    pub fn magic(&self) -> u32 {
        self.u32_at(OFF_MAGIC)
    }

    pub fn version(&self) -> u32 {
        self.u32_at(OFF_VERSION)
    }

    pub fn node_id(&self) -> u64 {
        self.u64_at(OFF_NODE_ID)
    }

    pub fn nmetrics(&self) -> u32 {
        self.u32_at(OFF_NMETRICS)
    }

    pub fn npoints(&self) -> u32 {
        self.u32_at(OFF_NPOINTS)
    }

    pub fn start_time(&self) -> i64 {
        self.i64_at(OFF_START_TIME)
    }

    pub fn interval(&self) -> u32 {
        self.u32_at(OFF_INTERVAL)
    }

    /// Decimation chain, truncated at the first zero entry (the chain terminator).
    pub fn decimation_chain(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(MAX_LAYERS);
        for i in 0..MAX_LAYERS {
            let d = self.u32_at(OFF_DECIMATION + i * 4);
            if d == 0 {
                break;
            }
            out.push(d);
        }
        out
    }

    pub fn metric_flags(&self, metric: usize) -> MetricFlags {
        MetricFlags::from_word(self.u32_at(OFF_FLAGS + metric * 4))
    }

    pub fn key_slot(&self, slot: usize) -> KeySlot {
        let off = OFF_KEYS + slot * KEY_RECORD_SIZE;
        let flags = self.u32_at(off);
        let mut value = [0u8; KEY_LENGTH];
        value.copy_from_slice(&self.map[off + 4..off + 4 + KEY_LENGTH]);
        KeySlot {
            in_use: flags & KEY_IN_USE != 0,
            value,
        }
    }

    /// Sets `npoints` under the caller's lock; does not flush.
    pub fn set_npoints(&mut self, value: u32) {
        self.map[OFF_NPOINTS..OFF_NPOINTS + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Sets `start_time` under the caller's lock; does not flush. Only valid
    /// the first time a node transitions from empty (`npoints == 0`).
    pub fn set_start_time(&mut self, value: i64) {
        self.map[OFF_START_TIME..OFF_START_TIME + 8].copy_from_slice(&value.to_le_bytes());
    }

    pub fn set_key_slot(&mut self, slot: usize, value: Option<&[u8; KEY_LENGTH]>) {
        let off = OFF_KEYS + slot * KEY_RECORD_SIZE;
        match value {
            Some(bytes) => {
                self.map[off..off + 4].copy_from_slice(&KEY_IN_USE.to_le_bytes());
                self.map[off + 4..off + 4 + KEY_LENGTH].copy_from_slice(bytes);
            }
            None => {
                self.map[off..off + 4].copy_from_slice(&0u32.to_le_bytes());
                self.map[off + 4..off + 4 + KEY_LENGTH].fill(0);
            }
        }
    }

    /// Requests asynchronous write-back of the mapped region.
    pub fn flush_async(&self) -> Result<(), MetadataError> {
        self.map.flush_async().map_err(MetadataError::Io)
    }
}
