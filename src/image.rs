//! Volumetric images and the slices and segments they own

use crate::error::{GmhError, Result};
use crate::io::{DataLoader, ImageSamplesSource};
use crate::layout::{checked_voxel_count, shape_of, Shape};
use crate::lazy::LazyBuffer;
use crate::segment::Segment;
use crate::slice::Slice;
use crate::types::{validate_identifier, validate_vector, Color, MetaData, Precision, Vector3};
use ndarray::{Array3, ArrayView2, Axis, Zip};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Non-owning handle a slice or segment keeps to the image it was created for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageKey(u64);

impl ImageKey {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A volumetric image.
///
/// Axes of the sample array run inferior→superior, posterior→anterior and
/// left→right with increasing index. The image is the sole owner of its
/// slices (keyed by index) and segments (keyed by identifier).
#[derive(Debug)]
pub struct Image {
    key: ImageKey,
    identifier: Option<String>,
    shape: Option<Shape>,
    samples: LazyBuffer<Array3<i32>>,
    voxel_size: Option<Vector3>,
    voxel_spacing: Option<Vector3>,
    meta_data: MetaData,
    slices: BTreeMap<usize, Slice>,
    segments: HashMap<String, Segment>,
}

impl Default for Image {
    fn default() -> Self {
        Self::new()
    }
}

impl Image {
    /// An image without sample data
    pub fn new() -> Self {
        Self::from_buffer(None, LazyBuffer::unset())
    }

    pub fn with_samples(samples: Array3<i32>) -> Self {
        Self::from_buffer(Some(shape_of(&samples)), LazyBuffer::ready(samples))
    }

    /// An image whose samples are fetched from `loader` on first access.
    ///
    /// The shape is taken from the loader's manifest up front.
    pub fn lazy(loader: Arc<dyn DataLoader>) -> Result<Self> {
        let record = &loader.manifest().image;
        let precision = Precision::from_bytes(record.precision_bytes)?;
        let shape = record.size;
        if checked_voxel_count(&shape, precision.size_in_bytes()).is_none() {
            return Err(GmhError::Corruption(format!(
                "image size {:?} is too large to address",
                shape
            )));
        }
        Ok(Self::from_buffer(
            Some(shape),
            LazyBuffer::deferred(Box::new(ImageSamplesSource::new(loader))),
        ))
    }

    fn from_buffer(shape: Option<Shape>, samples: LazyBuffer<Array3<i32>>) -> Self {
        Self {
            key: ImageKey::next(),
            identifier: None,
            shape,
            samples,
            voxel_size: None,
            voxel_spacing: None,
            meta_data: MetaData::new(),
            slices: BTreeMap::new(),
            segments: HashMap::new(),
        }
    }

    pub(crate) fn key(&self) -> ImageKey {
        self.key
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn set_identifier(&mut self, identifier: Option<&str>) -> Result<()> {
        if let Some(identifier) = identifier {
            validate_identifier("image", identifier)?;
        }
        self.identifier = identifier.map(str::to_string);
        Ok(())
    }

    pub fn meta_data(&self) -> &MetaData {
        &self.meta_data
    }

    pub fn meta_data_mut(&mut self) -> &mut MetaData {
        &mut self.meta_data
    }

    /// Voxel size in mm
    pub fn voxel_size(&self) -> Option<Vector3> {
        self.voxel_size
    }

    pub fn set_voxel_size(&mut self, voxel_size: Option<Vector3>) -> Result<()> {
        if let Some(voxel_size) = &voxel_size {
            validate_vector("voxel size", voxel_size)?;
        }
        self.voxel_size = voxel_size;
        Ok(())
    }

    /// Distance between neighbouring voxel centers in mm
    pub fn voxel_spacing(&self) -> Option<Vector3> {
        self.voxel_spacing
    }

    pub fn set_voxel_spacing(&mut self, voxel_spacing: Option<Vector3>) -> Result<()> {
        if let Some(voxel_spacing) = &voxel_spacing {
            validate_vector("voxel spacing", voxel_spacing)?;
        }
        self.voxel_spacing = voxel_spacing;
        Ok(())
    }

    /// Shape of the sample array, known without materializing lazy samples
    pub fn shape(&self) -> Option<Shape> {
        self.shape
    }

    pub fn has_samples(&self) -> bool {
        self.samples.is_set()
    }

    pub fn is_materialized(&self) -> bool {
        self.samples.is_materialized()
    }

    /// The sample array, fetching it on first access for images read from a container.
    pub fn samples(&self) -> Result<&Array3<i32>> {
        let declared = self.shape;
        self.samples
            .get_or_fetch(|samples| {
                if Some(shape_of(samples)) == declared {
                    Ok(())
                } else {
                    Err(GmhError::Corruption(format!(
                        "image payload has shape {:?}, manifest declares {:?}",
                        shape_of(samples),
                        declared
                    )))
                }
            })?
            .ok_or_else(|| GmhError::MissingData("image has no sample data".to_string()))
    }

    /// Publish the sample array. Samples can only be set once.
    pub fn set_samples(&mut self, samples: Array3<i32>) -> Result<()> {
        if self.samples.is_set() {
            return Err(GmhError::Validation(
                "image samples are immutable once set".to_string(),
            ));
        }
        self.shape = Some(shape_of(&samples));
        self.samples.publish(samples)
    }

    pub fn has_slice(&self, index: usize) -> bool {
        self.slices.contains_key(&index)
    }

    pub fn has_slice_identifier(&self, identifier: &str) -> bool {
        self.slice_by_identifier(identifier).is_some()
    }

    pub fn slice(&self, index: usize) -> Option<&Slice> {
        self.slices.get(&index)
    }

    pub fn slice_mut(&mut self, index: usize) -> Option<&mut Slice> {
        self.slices.get_mut(&index)
    }

    pub fn slice_by_identifier(&self, identifier: &str) -> Option<&Slice> {
        self.slices
            .values()
            .find(|slice| slice.identifier() == Some(identifier))
    }

    /// Slices in index order
    pub fn slices(&self) -> impl Iterator<Item = &Slice> {
        self.slices.values()
    }

    pub fn add_slice(&mut self, index: usize, identifier: Option<&str>) -> Result<&mut Slice> {
        let slice = Slice::new(self, index, identifier)?;
        self.register_slice(slice)
    }

    /// The slice at `index`, created if missing. A differing `identifier` is
    /// applied to an existing slice.
    pub fn get_or_add_slice(
        &mut self,
        index: usize,
        identifier: Option<&str>,
    ) -> Result<&mut Slice> {
        if !self.has_slice(index) {
            return self.add_slice(index, identifier);
        }

        let current = self.slices.get(&index).and_then(|s| s.identifier().map(str::to_string));
        if identifier.is_some() && identifier != current.as_deref() {
            self.set_slice_identifier(index, identifier)?;
        }
        self.slices
            .get_mut(&index)
            .ok_or_else(|| GmhError::MissingData(format!("slice {}", index)))
    }

    pub fn register_slice(&mut self, slice: Slice) -> Result<&mut Slice> {
        if slice.owner() != self.key {
            return Err(GmhError::Validation(
                "slice was created for a different image".to_string(),
            ));
        }
        if self.has_slice(slice.index()) {
            return Err(GmhError::Validation(format!(
                "there already is a slice with index {}",
                slice.index()
            )));
        }
        if let Some(identifier) = slice.identifier() {
            if self.has_slice_identifier(identifier) {
                return Err(GmhError::Validation(format!(
                    "there already is a slice identified as {:?}",
                    identifier
                )));
            }
        }

        let index = slice.index();
        Ok(self.slices.entry(index).or_insert(slice))
    }

    pub fn set_slice_identifier(&mut self, index: usize, identifier: Option<&str>) -> Result<()> {
        if let Some(identifier) = identifier {
            validate_identifier("slice", identifier)?;
            if let Some(other) = self.slice_by_identifier(identifier) {
                if other.index() != index {
                    return Err(GmhError::Validation(format!(
                        "there already is a slice identified as {:?}",
                        identifier
                    )));
                }
            }
        }

        let slice = self
            .slices
            .get_mut(&index)
            .ok_or_else(|| GmhError::Validation(format!("unknown slice index: {}", index)))?;
        slice.replace_identifier(identifier.map(str::to_string));
        Ok(())
    }

    pub fn remove_slice(&mut self, index: usize) -> Option<Slice> {
        self.slices.remove(&index)
    }

    /// Cross-section of the sample array at a registered slice
    pub fn slice_samples(&self, index: usize) -> Result<ArrayView2<'_, i32>> {
        if !self.has_slice(index) {
            return Err(GmhError::Validation(format!("unknown slice index: {}", index)));
        }
        Ok(self.samples()?.index_axis(Axis(0), index))
    }

    pub fn has_segment(&self, identifier: &str) -> bool {
        self.segments.contains_key(identifier)
    }

    pub fn segment(&self, identifier: &str) -> Option<&Segment> {
        self.segments.get(identifier)
    }

    pub fn segment_mut(&mut self, identifier: &str) -> Option<&mut Segment> {
        self.segments.get_mut(identifier)
    }

    /// Segments in no particular order
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.values()
    }

    /// Segments in the order they were created
    pub fn ordered_segments(&self) -> Vec<&Segment> {
        let mut segments: Vec<&Segment> = self.segments.values().collect();
        segments.sort_by(|a, b| {
            a.order_index()
                .cmp(&b.order_index())
                .then_with(|| a.identifier().cmp(b.identifier()))
        });
        segments
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub(crate) fn next_segment_order(&self) -> u64 {
        self.segments
            .values()
            .map(|segment| segment.order_index() + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn add_segment(
        &mut self,
        identifier: &str,
        mask: Array3<bool>,
        color: Option<Color>,
    ) -> Result<&mut Segment> {
        let mut segment = Segment::new(self, identifier, Some(mask))?;
        segment.set_color(color);
        self.register_segment(segment)
    }

    pub fn register_segment(&mut self, segment: Segment) -> Result<&mut Segment> {
        if segment.owner() != self.key {
            return Err(GmhError::Validation(
                "segment was created for a different image".to_string(),
            ));
        }
        if self.has_segment(segment.identifier()) {
            return Err(GmhError::Validation(format!(
                "there already is a segment identified as {:?}",
                segment.identifier()
            )));
        }
        if Some(segment.shape()) != self.shape {
            return Err(GmhError::Validation(format!(
                "segment shape {:?} differs from image shape {:?}",
                segment.shape(),
                self.shape
            )));
        }

        let identifier = segment.identifier().to_string();
        Ok(self.segments.entry(identifier).or_insert(segment))
    }

    pub fn rename_segment(&mut self, current: &str, identifier: &str) -> Result<()> {
        validate_identifier("segment", identifier)?;
        if current == identifier {
            return Ok(());
        }
        if self.has_segment(identifier) {
            return Err(GmhError::Validation(format!(
                "there already is a segment identified as {:?}",
                identifier
            )));
        }

        let mut segment = self
            .segments
            .remove(current)
            .ok_or_else(|| GmhError::Validation(format!("unknown segment: {:?}", current)))?;
        segment.replace_identifier(identifier.to_string());
        self.segments.insert(identifier.to_string(), segment);
        Ok(())
    }

    pub fn remove_segment(&mut self, identifier: &str) -> Option<Segment> {
        self.segments.remove(identifier)
    }

    /// Copy of the samples with values substituted inside and/or outside a
    /// segment. `None` leaves that region untouched.
    pub fn segmented_samples(
        &self,
        identifier: &str,
        inner: Option<i32>,
        outer: Option<i32>,
    ) -> Result<Array3<i32>> {
        let segment = self
            .segment(identifier)
            .ok_or_else(|| GmhError::Validation(format!("unknown segment: {:?}", identifier)))?;
        let mut data = self.samples()?.clone();
        let mask = segment.mask()?;

        Zip::from(&mut data).and(mask).for_each(|value, &inside| {
            let substitute = if inside { inner } else { outer };
            if let Some(substitute) = substitute {
                *value = substitute;
            }
        });

        Ok(data)
    }
}
