//! Vector layout and fvecs file helpers.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use aligned_vec::AVec;

use crate::error::{CodebookError, Result};

/// Alignment (in bytes) of the continuous vector buffers.
pub const ALIGN: usize = 64;

/// Largest vector dimension accepted from a binary file header.
pub const MAX_DIM: usize = 1 << 20;

/// Flatten a list of vectors into one aligned buffer.
pub fn as_continuous_vec(vecs: &[Vec<f32>]) -> AVec<f32> {
    AVec::from_iter(ALIGN, vecs.iter().flat_map(|v| v.iter().copied()))
}

/// Split a continuous buffer back into rows of `dim`.
pub fn as_matrix(vecs: &[f32], dim: usize) -> Vec<Vec<f32>> {
    vecs.chunks(dim).map(|v| v.to_vec()).collect()
}

/// Read an fvecs file: every record is a `u32` dimension followed by `dim` f32 values.
pub fn read_vecs(path: &Path) -> Result<Vec<Vec<f32>>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut dim_buf = [0u8; 4];
    let mut vecs = Vec::new();
    loop {
        match reader.read_exact(&mut dim_buf) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err.into()),
        }
        let dim = u32::from_le_bytes(dim_buf) as usize;
        if dim == 0 || dim > MAX_DIM {
            return Err(CodebookError::malformed(
                vecs.len() + 1,
                format!("invalid fvecs dimension {}", dim),
            ));
        }
        let mut vec = vec![0f32; dim];
        reader
            .read_exact(bytemuck::cast_slice_mut(&mut vec))
            .map_err(|_| CodebookError::malformed(vecs.len() + 1, "truncated fvecs record"))?;
        if cfg!(target_endian = "big") {
            vec.iter_mut()
                .for_each(|x| *x = f32::from_bits(x.to_bits().swap_bytes()));
        }
        vecs.push(vec);
    }
    Ok(vecs)
}

/// Write vectors to an fvecs file.
pub fn write_vecs<T: AsRef<[f32]>>(path: &Path, vecs: &[T]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for vec in vecs.iter() {
        let vec = vec.as_ref();
        writer.write_all(&(vec.len() as u32).to_le_bytes())?;
        write_f32_le(&mut writer, vec)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write f32 values in little-endian order.
pub(crate) fn write_f32_le<W: Write>(writer: &mut W, vec: &[f32]) -> Result<()> {
    if cfg!(target_endian = "little") {
        writer.write_all(bytemuck::cast_slice(vec))?;
    } else {
        for x in vec.iter() {
            writer.write_all(&x.to_le_bytes())?;
        }
    }
    Ok(())
}
