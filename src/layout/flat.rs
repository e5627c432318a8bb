//! Flat compatibility encoding.
//!
//! Rays are 8 consecutive `f32` values: origin, direction, t_min, t_max.
//! Intersections are 8 consecutive `i32` words: validity, then every field in
//! declaration order with floats stored as their IEEE 754 bit patterns and the
//! unsigned keys stored as two's complement bit patterns.

use super::{IntersectionRecord, LayoutError, RECORD_WORDS, RayRecord};

fn check_stride(len: usize) -> Result<usize, LayoutError> {
    if len % RECORD_WORDS == 0 {
        Ok(len / RECORD_WORDS)
    } else {
        Err(LayoutError::RaggedBatch {
            len,
            stride: RECORD_WORDS,
        })
    }
}

/// Reinterprets a flat ray buffer as ray records without copying.
pub fn rays_from_flat(flat: &[f32]) -> Result<&[RayRecord], LayoutError> {
    check_stride(flat.len())?;
    bytemuck::try_cast_slice(flat).map_err(LayoutError::SliceCast)
}

pub fn rays_to_flat(rays: &[RayRecord]) -> &[f32] {
    bytemuck::cast_slice(rays)
}

pub fn encode_intersection(record: &IntersectionRecord) -> [i32; RECORD_WORDS] {
    [
        record.validity,
        record.t.to_bits() as i32,
        record.geometry_index as i32,
        record.submesh_key as i32,
        record.triangle_index as i32,
        record.u.to_bits() as i32,
        record.v.to_bits() as i32,
        record.w.to_bits() as i32,
    ]
}

pub fn decode_intersection(words: &[i32; RECORD_WORDS]) -> IntersectionRecord {
    let float = |word: i32| f32::from_bits(word as u32);
    IntersectionRecord {
        validity: words[0],
        t: float(words[1]),
        geometry_index: words[2] as u32,
        submesh_key: words[3] as u32,
        triangle_index: words[4] as u32,
        u: float(words[5]),
        v: float(words[6]),
        w: float(words[7]),
    }
}

/// Writes the records into a flat word buffer of exactly matching size.
pub fn encode_intersections(
    records: &[IntersectionRecord],
    out: &mut [i32],
) -> Result<(), LayoutError> {
    let count = check_stride(out.len())?;
    if count != records.len() {
        return Err(LayoutError::RaggedBatch {
            len: out.len(),
            stride: RECORD_WORDS,
        });
    }

    for (record, words) in records.iter().zip(out.chunks_exact_mut(RECORD_WORDS)) {
        words.copy_from_slice(&encode_intersection(record));
    }
    Ok(())
}

pub fn decode_intersections(words: &[i32]) -> Result<Vec<IntersectionRecord>, LayoutError> {
    check_stride(words.len())?;
    Ok(words
        .chunks_exact(RECORD_WORDS)
        .map(|chunk| {
            let mut record_words = [0; RECORD_WORDS];
            record_words.copy_from_slice(chunk);
            decode_intersection(&record_words)
        })
        .collect())
}
