//! A single resolution layer: a flat file of fixed-width rows.
//!
//! Row `i` occupies bytes `[i * row_size, (i + 1) * row_size)`, where
//! `row_size = nmetrics * size_of::<f64>()`. There is no header; the row
//! count of a layer is always derived from the file's length rather than
//! tracked separately, so it can never drift out of sync with what is
//! actually on disk (see the metadata store for the one place a row count
//! *is* additionally cached, for layer 0's `npoints`).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::LayerError;

/// Bound on the maximum size of a single padding write, matching the
/// original implementation's fixed 1 MiB padding scratch buffer.
const MAX_PADDING_BLOCK_BYTES: usize = 1024 * 1024;

pub struct LayerFile {
    file: File,
    nmetrics: usize,
}

impl LayerFile {
    pub fn row_size(nmetrics: usize) -> usize {
        nmetrics * std::mem::size_of::<f64>()
    }

    /// Opens a layer file, creating it if absent (a layer with no rows yet
    /// is simply an empty file).
    pub fn open_or_create(path: &Path, nmetrics: usize) -> Result<Self, LayerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self { file, nmetrics })
    }

    /// Number of rows currently on disk, derived from file length.
    pub fn row_count(&self) -> Result<u64, LayerError> {
        let len = self.file.metadata()?.len();
        Ok(len / Self::row_size(self.nmetrics) as u64)
    }

    fn seek_to_row(&mut self, index: u64) -> Result<(), LayerError> {
        let row_size = Self::row_size(self.nmetrics) as u64;
        let offset = index
            .checked_mul(row_size)
            .ok_or(LayerError::OutOfBounds(index))?;
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Reads the row at `index` if it exists, `None` if it is beyond the
    /// current row count.
    pub fn read_row(&mut self, index: u64) -> Result<Option<Vec<f64>>, LayerError> {
        if index >= self.row_count()? {
            return Ok(None);
        }
        self.seek_to_row(index)?;
        let mut buf = vec![0u8; Self::row_size(self.nmetrics)];
        self.file.read_exact(&mut buf)?;
        Ok(Some(decode_row(&buf)))
    }

    /// Writes `values` (length `nmetrics`) at `index`, extending the file if
    /// `index` is beyond the current end.
    pub fn write_row(&mut self, index: u64, values: &[f64]) -> Result<(), LayerError> {
        self.seek_to_row(index)?;
        self.file.write_all(&encode_row(values))?;
        Ok(())
    }

    /// Reads up to `count` consecutive rows starting at `start`, stopping
    /// early at the current row count (the window may be short at the tail).
    pub fn read_window(&mut self, start: u64, count: u64) -> Result<Vec<Vec<f64>>, LayerError> {
        let n = self.row_count()?;
        if start >= n {
            return Ok(Vec::new());
        }
        let available = (n - start).min(count);
        self.seek_to_row(start)?;
        let row_size = Self::row_size(self.nmetrics);
        let mut rows = Vec::with_capacity(available as usize);
        let mut buf = vec![0u8; row_size];
        for _ in 0..available {
            self.file.read_exact(&mut buf)?;
            rows.push(decode_row(&buf));
        }
        Ok(rows)
    }

    /// Pads rows `[from, to)` by repeating the same row (one value per
    /// metric, computed once by the caller from each metric's pad mode), in
    /// chunks bounded by [`MAX_PADDING_BLOCK_BYTES`] so a large gap never
    /// materializes one huge write buffer.
    pub fn pad_uniform(&mut self, from: u64, to: u64, row: &[f64]) -> Result<(), LayerError> {
        if to <= from {
            return Ok(());
        }
        let row_size = Self::row_size(self.nmetrics);
        let chunk_rows = (MAX_PADDING_BLOCK_BYTES / row_size.max(1)).max(1) as u64;
        let encoded_row = encode_row(row);

        self.seek_to_row(from)?;
        let mut remaining = to - from;
        while remaining > 0 {
            let this_chunk = remaining.min(chunk_rows);
            let mut buf = Vec::with_capacity(this_chunk as usize * row_size);
            for _ in 0..this_chunk {
                buf.extend_from_slice(&encoded_row);
            }
            self.file.write_all(&buf)?;
            remaining -= this_chunk;
        }
        Ok(())
    }

    /// Scans backward from `before` (exclusive) for the most recent non-NaN
    /// value recorded for `metric`. Returns NaN if none is found.
    pub fn last_valid_value(&mut self, metric: usize, before: u64) -> Result<f64, LayerError> {
        let mut row = before;
        while row > 0 {
            row -= 1;
            if let Some(values) = self.read_row(row)? {
                let v = values[metric];
                if !v.is_nan() {
                    return Ok(v);
                }
            }
        }
        Ok(f64::NAN)
    }
}

fn encode_row(values: &[f64]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(values.len() * 8);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf
}

fn decode_row(buf: &[u8]) -> Vec<f64> {
    buf.chunks_exact(8)
        .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
        .collect()
}
