//! Core value types shared by the image model and the container codec

use crate::error::{GmhError, Result};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Free-form metadata attached to images, slices and segments.
pub type MetaData = serde_json::Map<String, serde_json::Value>;

/// Physical extent in millimeters along the three image axes.
pub type Vector3 = [f64; 3];

/// Integer position within the image volume.
pub type Coordinates3 = [usize; 3];

/// RGB display color.
pub type Color = [u8; 3];

/// Sample encodings of the primary image volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// Signed 32-bit integer, little endian
    I32,
}

impl Precision {
    /// Resolve the encoding declared by a manifest's `precision_bytes`.
    pub fn from_bytes(precision_bytes: u32) -> Result<Self> {
        match precision_bytes {
            4 => Ok(Precision::I32),
            other => Err(GmhError::UnsupportedPrecision(other)),
        }
    }

    /// Size in bytes of one sample
    pub fn size_in_bytes(&self) -> usize {
        match self {
            Precision::I32 => 4,
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\- ]+$").expect("valid identifier pattern"))
}

fn slug_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-]+$").expect("valid slug pattern"))
}

/// Whether `identifier` may name an image, slice or segment.
pub fn is_valid_identifier(identifier: &str) -> bool {
    identifier_pattern().is_match(identifier)
}

/// Fails with a validation error naming `kind` when `identifier` is malformed.
pub fn validate_identifier(kind: &str, identifier: &str) -> Result<()> {
    if is_valid_identifier(identifier) {
        Ok(())
    } else {
        Err(GmhError::Validation(format!(
            "invalid {} identifier: {:?}",
            kind, identifier
        )))
    }
}

/// Slugs end up in archive member names, so spaces are not allowed.
pub fn is_valid_slug(slug: &str) -> bool {
    slug_pattern().is_match(slug)
}

/// Voxel size and spacing must be strictly positive and finite.
pub fn validate_vector(kind: &str, vector: &Vector3) -> Result<()> {
    if vector.iter().all(|c| c.is_finite() && *c > 0.0) {
        Ok(())
    } else {
        Err(GmhError::Validation(format!(
            "{} components must be positive, got {:?}",
            kind, vector
        )))
    }
}

/// Fold every character outside the identifier alphabet to `_`.
pub fn sanitize_identifier(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
