//! Named vector store: text parsing and the binary sequence file.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use aligned_vec::AVec;
use log::debug;

use crate::error::{CodebookError, Result};
use crate::utils::{ALIGN, MAX_DIM, write_f32_le};

const SEQUENCE_MAGIC: &[u8; 4] = b"CBSQ";
const SEQUENCE_VERSION: u32 = 1;
const PREALLOC_RECORDS: usize = 1 << 16;

/// A vector together with its identifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NamedVector<'a> {
    /// identifier, unique within a store
    pub id: u64,
    /// values
    pub vector: &'a [f32],
}

/// Ordered collection of named vectors sharing one dimension.
///
/// Values are kept in one continuous aligned buffer, row after row.
#[derive(Debug, Clone)]
pub struct VectorStore {
    dim: usize,
    ids: Vec<u64>,
    data: AVec<f32>,
}

impl VectorStore {
    /// Build a store from continuous values and their identifiers.
    pub fn new(dim: usize, ids: Vec<u64>, data: AVec<f32>) -> Result<Self> {
        if dim == 0 && !ids.is_empty() {
            return Err(CodebookError::malformed(1, "vectors must have at least one dimension"));
        }
        if data.len() != ids.len() * dim {
            return Err(CodebookError::malformed(
                ids.len(),
                format!(
                    "{} values cannot hold {} vectors of dimension {}",
                    data.len(),
                    ids.len(),
                    dim
                ),
            ));
        }
        Ok(Self { dim, ids, data })
    }

    /// Parse whitespace-separated vectors, one per line.
    ///
    /// Blank lines are skipped. Identifiers start from 1 in line order.
    pub fn from_text<R: BufRead>(mut reader: R) -> Result<Self> {
        let mut dim = 0;
        let mut ids = Vec::new();
        let mut values = Vec::new();
        let mut buf = Vec::new();
        let mut line_no = 0;
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_no += 1;
            let line = std::str::from_utf8(&buf)
                .map_err(|_| CodebookError::malformed(line_no, "invalid UTF-8"))?;
            let start = values.len();
            for token in line.split_whitespace() {
                let value: f32 = token.parse().map_err(|_| {
                    CodebookError::malformed(line_no, format!("`{}` is not a number", token))
                })?;
                if !value.is_finite() {
                    return Err(CodebookError::malformed(
                        line_no,
                        format!("`{}` is not a finite number", token),
                    ));
                }
                values.push(value);
            }
            let len = values.len() - start;
            if len == 0 {
                continue;
            }
            if ids.is_empty() {
                dim = len;
            } else if len != dim {
                return Err(CodebookError::malformed(
                    line_no,
                    format!("expect {} dimensions, got {}", dim, len),
                ));
            }
            ids.push(ids.len() as u64 + 1);
        }
        debug!("parsed {} vectors of dimension {}", ids.len(), dim);
        Self::new(dim, ids, AVec::from_iter(ALIGN, values))
    }

    /// Parse a text vector file.
    pub fn read_text(path: &Path) -> Result<Self> {
        Self::from_text(BufReader::new(File::open(path)?))
    }

    /// Write the store as a binary sequence of `(id, vector)` records.
    ///
    /// Layout (little-endian): magic `CBSQ`, `u32` version, `u32` dim, `u64` count,
    /// then per record a `u64` id and `dim` f32 values.
    pub fn write_sequence<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(SEQUENCE_MAGIC)?;
        writer.write_all(&SEQUENCE_VERSION.to_le_bytes())?;
        writer.write_all(&(self.dim as u32).to_le_bytes())?;
        writer.write_all(&(self.len() as u64).to_le_bytes())?;
        for vec in self.iter() {
            writer.write_all(&vec.id.to_le_bytes())?;
            write_f32_le(&mut writer, vec.vector)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read a store written by [`VectorStore::write_sequence`].
    pub fn read_sequence<R: Read>(mut reader: R) -> Result<Self> {
        let mut header = [0u8; 20];
        reader
            .read_exact(&mut header)
            .map_err(|_| CodebookError::malformed(0, "truncated sequence header"))?;
        if &header[..4] != SEQUENCE_MAGIC {
            return Err(CodebookError::malformed(0, "not a vector sequence file"));
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != SEQUENCE_VERSION {
            return Err(CodebookError::malformed(
                0,
                format!("unsupported sequence version {}", version),
            ));
        }
        let dim = u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize;
        let mut count_buf = [0u8; 8];
        count_buf.copy_from_slice(&header[12..20]);
        let count = usize::try_from(u64::from_le_bytes(count_buf))
            .map_err(|_| CodebookError::malformed(0, "record count does not fit in memory"))?;
        if count > 0 && (dim == 0 || dim > MAX_DIM) {
            return Err(CodebookError::malformed(
                0,
                format!("invalid sequence dimension {}", dim),
            ));
        }
        if count.checked_mul(dim).is_none() {
            return Err(CodebookError::malformed(
                0,
                format!("{} records of dimension {} overflow", count, dim),
            ));
        }

        // the header is untrusted, truncation is caught by `read_exact` below
        let reserve = count.min(PREALLOC_RECORDS);
        let mut ids = Vec::with_capacity(reserve);
        let mut values = Vec::with_capacity(reserve * dim);
        let mut id_buf = [0u8; 8];
        let mut row = vec![0f32; dim];
        for record in 1..=count {
            reader
                .read_exact(&mut id_buf)
                .and_then(|_| reader.read_exact(bytemuck::cast_slice_mut(&mut row)))
                .map_err(|_| CodebookError::malformed(record, "truncated sequence record"))?;
            ids.push(u64::from_le_bytes(id_buf));
            values.extend(row.iter().map(|x| f32::from_bits(u32::from_le(x.to_bits()))));
        }
        Self::new(dim, ids, AVec::from_iter(ALIGN, values))
    }

    /// Write the binary sequence file at `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.write_sequence(BufWriter::new(File::create(path)?))
    }

    /// Load the binary sequence file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        Self::read_sequence(BufReader::new(File::open(path)?))
    }

    /// Dimension of every vector.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of vectors.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the store holds no vector.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Identifiers in store order.
    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    /// All values as one continuous slice.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Values of the `index`-th vector.
    pub fn vector(&self, index: usize) -> &[f32] {
        &self.data[index * self.dim..(index + 1) * self.dim]
    }

    /// Iterate over the named vectors in store order.
    pub fn iter(&self) -> impl Iterator<Item = NamedVector<'_>> {
        self.ids
            .iter()
            .zip(self.data.chunks(self.dim.max(1)))
            .map(|(&id, vector)| NamedVector { id, vector })
    }
}
