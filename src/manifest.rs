//! The container manifest: JSON description of an image, its slices and segments

use crate::error::{GmhError, Result};
use crate::image::Image;
use crate::layout::{checked_voxel_count, shape_of, BoundingBox, Shape};
use crate::types::{
    is_valid_identifier, is_valid_slug, Color, MetaData, Precision, Vector3,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{HashMap, HashSet};

/// Nullable fields must still be present in the document.
fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer)
}

/// Complete manifest of a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub image: ImageRecord,
    pub meta_data: MetaData,
    pub slices: Vec<SliceRecord>,
    pub segments: Vec<SegmentRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub precision_bytes: u32,

    /// The sample payload carries no header; this is its only shape record.
    pub size: Shape,

    #[serde(deserialize_with = "nullable")]
    pub voxel_size: Option<Vector3>,

    #[serde(deserialize_with = "nullable")]
    pub voxel_spacing: Option<Vector3>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceRecord {
    pub index: usize,

    #[serde(deserialize_with = "nullable")]
    pub identifier: Option<String>,

    pub meta_data: MetaData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub identifier: String,

    /// Absent for segments with an empty mask, which have no payload
    #[serde(deserialize_with = "nullable")]
    pub slug: Option<String>,

    #[serde(deserialize_with = "nullable")]
    pub bounding_box: Option<BoundingBox>,

    #[serde(deserialize_with = "nullable")]
    pub color: Option<Color>,

    pub meta_data: MetaData,
}

fn schema_error(message: String) -> GmhError {
    GmhError::Schema(message)
}

impl Manifest {
    /// Describe `image`, with `slugs` naming the payload of each non-empty segment.
    ///
    /// Materializes the samples and every mask. The result is validated before
    /// it is returned; a failure here means the image cannot be stored.
    pub fn build(image: &Image, slugs: &HashMap<String, String>) -> Result<Self> {
        let samples = image.samples()?;

        let slices = image
            .slices()
            .map(|slice| SliceRecord {
                index: slice.index(),
                identifier: slice.identifier().map(str::to_string),
                meta_data: slice.meta_data().clone(),
            })
            .collect();

        let mut segments = Vec::with_capacity(image.segment_count());
        for segment in image.ordered_segments() {
            let bounding_box = BoundingBox::of_mask(segment.mask()?);
            let slug = bounding_box.and_then(|_| slugs.get(segment.identifier()).cloned());
            segments.push(SegmentRecord {
                identifier: segment.identifier().to_string(),
                slug,
                bounding_box,
                color: segment.color(),
                meta_data: segment.meta_data().clone(),
            });
        }

        let manifest = Manifest {
            image: ImageRecord {
                precision_bytes: Precision::I32.size_in_bytes() as u32,
                size: shape_of(samples),
                voxel_size: image.voxel_size(),
                voxel_spacing: image.voxel_spacing(),
            },
            meta_data: image.meta_data().clone(),
            slices,
            segments,
        };

        manifest.validate()?;
        Ok(manifest)
    }

    /// Deserialize a manifest, optionally validating it beyond its structure.
    pub fn parse(bytes: &[u8], validate: bool) -> Result<Self> {
        let manifest: Manifest = serde_json::from_slice(bytes)
            .map_err(|e| schema_error(format!("malformed manifest: {}", e)))?;
        if validate {
            manifest.validate()?;
        }
        Ok(manifest)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Check the constraints the type structure alone cannot express.
    pub fn validate(&self) -> Result<()> {
        let precision = Precision::from_bytes(self.image.precision_bytes)?;
        let size = self.image.size;
        if checked_voxel_count(&size, precision.size_in_bytes()).is_none() {
            return Err(schema_error(format!("image.size {:?} is too large to address", size)));
        }

        for (name, vector) in [
            ("voxel_size", &self.image.voxel_size),
            ("voxel_spacing", &self.image.voxel_spacing),
        ] {
            if let Some(vector) = vector {
                if !vector.iter().all(|c| c.is_finite() && *c > 0.0) {
                    return Err(schema_error(format!(
                        "image.{} must be positive, got {:?}",
                        name, vector
                    )));
                }
            }
        }

        let mut slice_indices = HashSet::new();
        let mut slice_identifiers = HashSet::new();
        for slice in &self.slices {
            if slice.index >= size[0] {
                return Err(schema_error(format!(
                    "slice index {} is outside of the image depth {}",
                    slice.index, size[0]
                )));
            }
            if !slice_indices.insert(slice.index) {
                return Err(schema_error(format!("duplicate slice index {}", slice.index)));
            }
            if let Some(identifier) = &slice.identifier {
                if !is_valid_identifier(identifier) {
                    return Err(schema_error(format!("invalid slice identifier {:?}", identifier)));
                }
                if !slice_identifiers.insert(identifier.as_str()) {
                    return Err(schema_error(format!(
                        "duplicate slice identifier {:?}",
                        identifier
                    )));
                }
            }
        }

        let mut segment_identifiers = HashSet::new();
        let mut slugs = HashSet::new();
        for segment in &self.segments {
            if !is_valid_identifier(&segment.identifier) {
                return Err(schema_error(format!(
                    "invalid segment identifier {:?}",
                    segment.identifier
                )));
            }
            if !segment_identifiers.insert(segment.identifier.as_str()) {
                return Err(schema_error(format!(
                    "duplicate segment identifier {:?}",
                    segment.identifier
                )));
            }

            match (&segment.slug, &segment.bounding_box) {
                (None, None) => {}
                (Some(slug), Some(bounding_box)) => {
                    if !is_valid_slug(slug) {
                        return Err(schema_error(format!("invalid slug {:?}", slug)));
                    }
                    if !slugs.insert(slug.as_str()) {
                        return Err(schema_error(format!("duplicate slug {:?}", slug)));
                    }
                    if !bounding_box.fits_within(&size) {
                        return Err(schema_error(format!(
                            "bounding box of segment {:?} exceeds image size {:?}",
                            segment.identifier, size
                        )));
                    }
                }
                _ => {
                    return Err(schema_error(format!(
                        "segment {:?} must have both a slug and a bounding box, or neither",
                        segment.identifier
                    )));
                }
            }
        }

        Ok(())
    }
}
