//! Utility functions

use crate::error::{GmhError, Result};
use crate::layout::{checked_voxel_count, voxel_count, Shape};
use ndarray::Array3;

/// Member holding the JSON manifest
pub const MANIFEST_MEMBER: &str = "manifest.json";

/// Member holding the raw image samples
pub const IMAGE_DATA_MEMBER: &str = "image_data.npy";

/// Member name of a segment mask payload
pub fn mask_member_name(slug: &str) -> String {
    format!("mask-{}.npy", slug)
}

/// Encode samples as headerless little-endian `i32`, row-major.
pub fn samples_to_bytes(samples: &Array3<i32>) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 4);
    for sample in samples.iter() {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Decode headerless little-endian `i32` samples into the declared shape.
pub fn bytes_to_samples(bytes: &[u8], shape: Shape) -> Result<Array3<i32>> {
    let expected = checked_voxel_count(&shape, 4)
        .map(|count| count * 4)
        .ok_or_else(|| oversized(shape))?;
    if bytes.len() != expected {
        return Err(GmhError::Corruption(format!(
            "image payload holds {} bytes, shape {:?} requires {}",
            bytes.len(),
            shape,
            expected
        )));
    }

    let samples = bytes
        .chunks_exact(4)
        .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    Array3::from_shape_vec((shape[0], shape[1], shape[2]), samples)
        .map_err(|e| GmhError::Corruption(e.to_string()))
}

fn oversized(shape: Shape) -> GmhError {
    GmhError::Corruption(format!("declared shape {:?} is too large to address", shape))
}

/// Encode a mask as one byte per voxel, row-major.
pub fn mask_to_bytes<'a>(mask: impl IntoIterator<Item = &'a bool>) -> Vec<u8> {
    mask.into_iter().map(|&value| u8::from(value)).collect()
}

/// Decode a one-byte-per-voxel mask; any non-zero byte is set.
pub fn bytes_to_mask(bytes: &[u8], shape: Shape) -> Result<Array3<bool>> {
    let expected = voxel_count(&shape).ok_or_else(|| oversized(shape))?;
    if bytes.len() != expected {
        return Err(GmhError::Corruption(format!(
            "mask payload holds {} bytes, shape {:?} requires {}",
            bytes.len(),
            shape,
            expected
        )));
    }

    Array3::from_shape_vec(
        (shape[0], shape[1], shape[2]),
        bytes.iter().map(|&b| b != 0).collect(),
    )
    .map_err(|e| GmhError::Corruption(e.to_string()))
}

/// Format byte size in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];

    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_encoding_is_little_endian() {
        let samples = Array3::from_shape_vec((1, 1, 2), vec![1, -2]).unwrap();
        assert_eq!(
            samples_to_bytes(&samples),
            vec![1, 0, 0, 0, 0xFE, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_samples_roundtrip_preserves_axis_order() {
        let samples = Array3::from_shape_fn((2, 3, 4), |(i, j, k)| (i * 100 + j * 10 + k) as i32);
        let decoded = bytes_to_samples(&samples_to_bytes(&samples), [2, 3, 4]).unwrap();
        assert_eq!(decoded, samples);
        assert_eq!(decoded[[1, 2, 3]], 123);
    }

    #[test]
    fn test_payload_size_mismatch_is_corruption() {
        assert!(matches!(
            bytes_to_samples(&[0u8; 7], [1, 1, 2]),
            Err(GmhError::Corruption(_))
        ));
        assert!(matches!(
            bytes_to_mask(&[1u8; 3], [2, 2, 1]),
            Err(GmhError::Corruption(_))
        ));
    }

    #[test]
    fn test_oversized_shape_is_corruption() {
        let huge = 1usize << 40;
        assert!(matches!(
            bytes_to_samples(&[], [huge, huge, huge]),
            Err(GmhError::Corruption(_))
        ));
        assert!(matches!(
            bytes_to_mask(&[], [huge, huge, huge]),
            Err(GmhError::Corruption(_))
        ));
    }

    #[test]
    fn test_mask_decoding() {
        let mask = bytes_to_mask(&[0, 1, 2, 0], [1, 2, 2]).unwrap();
        assert_eq!(mask.iter().filter(|&&v| v).count(), 2);
        assert_eq!(mask_to_bytes(mask.iter()), vec![0, 1, 1, 0]);
    }

    #[test]
    fn test_member_names() {
        assert_eq!(mask_member_name("abcde"), "mask-abcde.npy");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KiB");
        assert_eq!(format_bytes(1048576), "1.00 MiB");
    }
}
