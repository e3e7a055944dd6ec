//! Named boolean masks over an image volume

use crate::error::{GmhError, Result};
use crate::image::{Image, ImageKey};
use crate::io::{DataLoader, SegmentMaskSource};
use crate::layout::{shape_of, BoundingBox, Shape};
use crate::lazy::LazyBuffer;
use crate::types::{is_valid_slug, validate_identifier, Color, MetaData};
use ndarray::{ArrayView3, Array3, Axis};
use std::collections::BTreeSet;
use std::sync::Arc;

/// A segment of an image: identifier, display attributes and a mask of the
/// image's exact shape.
///
/// The mask is published at most once and is immutable afterwards. Segments
/// read from a container fetch it on first access.
#[derive(Debug)]
pub struct Segment {
    owner: ImageKey,
    shape: Shape,
    identifier: String,
    slug: Option<String>,
    color: Option<Color>,
    meta_data: MetaData,
    order_index: u64,
    mask: LazyBuffer<Array3<bool>>,
}

impl Segment {
    /// Create a segment of `image`, not yet registered with it.
    pub fn new(image: &Image, identifier: &str, mask: Option<Array3<bool>>) -> Result<Self> {
        let mut segment = Self::detached(image, identifier, LazyBuffer::unset())?;
        if let Some(mask) = mask {
            segment.set_mask(mask)?;
        }
        Ok(segment)
    }

    /// Create a segment whose mask is fetched from `loader` on first access.
    pub fn lazy(
        image: &Image,
        identifier: &str,
        slug: &str,
        bounding_box: Option<BoundingBox>,
        loader: Arc<dyn DataLoader>,
    ) -> Result<Self> {
        let source = SegmentMaskSource::new(loader, slug, bounding_box);
        let mask = LazyBuffer::deferred(Box::new(source));
        let mut segment = Self::detached(image, identifier, mask)?;
        segment.set_slug(Some(slug))?;
        Ok(segment)
    }

    fn detached(image: &Image, identifier: &str, mask: LazyBuffer<Array3<bool>>) -> Result<Self> {
        validate_identifier("segment", identifier)?;
        if image.has_segment(identifier) {
            return Err(GmhError::Validation(format!(
                "there already is a segment identified as {:?}",
                identifier
            )));
        }
        let shape = image.shape().ok_or_else(|| {
            GmhError::Validation("image has no sample data to segment".to_string())
        })?;

        Ok(Self {
            owner: image.key(),
            shape,
            identifier: identifier.to_string(),
            slug: None,
            color: None,
            meta_data: MetaData::new(),
            order_index: image.next_segment_order(),
            mask,
        })
    }

    pub(crate) fn owner(&self) -> ImageKey {
        self.owner
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub(crate) fn replace_identifier(&mut self, identifier: String) {
        self.identifier = identifier;
    }

    /// Archive-internal name of the mask payload, if one was assigned
    pub fn slug(&self) -> Option<&str> {
        self.slug.as_deref()
    }

    pub fn set_slug(&mut self, slug: Option<&str>) -> Result<()> {
        if let Some(slug) = slug {
            if !is_valid_slug(slug) {
                return Err(GmhError::Validation(format!("invalid slug: {:?}", slug)));
            }
        }
        self.slug = slug.map(str::to_string);
        Ok(())
    }

    pub fn color(&self) -> Option<Color> {
        self.color
    }

    pub fn set_color(&mut self, color: Option<Color>) {
        self.color = color;
    }

    pub fn meta_data(&self) -> &MetaData {
        &self.meta_data
    }

    pub fn meta_data_mut(&mut self) -> &mut MetaData {
        &mut self.meta_data
    }

    /// Position in the owning image's creation order
    pub fn order_index(&self) -> u64 {
        self.order_index
    }

    /// Shape of the owning image, which the mask must match
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Whether a mask is published or can be fetched
    pub fn has_mask(&self) -> bool {
        self.mask.is_set()
    }

    pub fn is_materialized(&self) -> bool {
        self.mask.is_materialized()
    }

    /// The mask, fetching it on first access for segments read from a container.
    pub fn mask(&self) -> Result<&Array3<bool>> {
        let expected = self.shape;
        let identifier = &self.identifier;
        self.mask
            .get_or_fetch(|mask| {
                if shape_of(mask) == expected {
                    Ok(())
                } else {
                    Err(GmhError::Corruption(format!(
                        "mask of segment {:?} has shape {:?}, image has {:?}",
                        identifier,
                        shape_of(mask),
                        expected
                    )))
                }
            })?
            .ok_or_else(|| {
                GmhError::MissingData(format!("segment {:?} has no mask", self.identifier))
            })
    }

    /// Publish the mask. A mask can only be set once.
    pub fn set_mask(&mut self, mask: Array3<bool>) -> Result<()> {
        if shape_of(&mask) != self.shape {
            return Err(GmhError::Validation(format!(
                "mask shape {:?} differs from image shape {:?}",
                shape_of(&mask),
                self.shape
            )));
        }
        if self.mask.is_set() {
            return Err(GmhError::Validation(format!(
                "mask of segment {:?} is already set",
                self.identifier
            )));
        }
        self.mask.publish(mask)
    }

    /// Whether no voxel is set
    pub fn is_empty(&self) -> Result<bool> {
        Ok(!self.mask()?.iter().any(|&v| v))
    }

    /// Inclusive min/max index per axis of all set voxels.
    pub fn bounding_box(&self) -> Result<BoundingBox> {
        BoundingBox::of_mask(self.mask()?).ok_or_else(|| {
            GmhError::Validation(format!(
                "segment {:?} is empty and has no bounding box",
                self.identifier
            ))
        })
    }

    /// The mask restricted to its bounding box
    pub fn mask_in_bounding_box(&self) -> Result<ArrayView3<'_, bool>> {
        let bounding_box = self.bounding_box()?;
        bounding_box.crop(self.mask()?)
    }

    /// Indices of the slices containing at least one set voxel
    pub fn segmented_slice_indices(&self) -> Result<BTreeSet<usize>> {
        Ok(self
            .mask()?
            .axis_iter(Axis(0))
            .enumerate()
            .filter(|(_, plane)| plane.iter().any(|&v| v))
            .map(|(index, _)| index)
            .collect())
    }
}
