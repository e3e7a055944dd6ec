//! Volume shape and bounding-box geometry for sparse mask storage

use crate::error::{GmhError, Result};
use crate::types::Coordinates3;
use ndarray::{s, Array3, ArrayView3};
use serde::{Deserialize, Serialize};

/// Extent of a volume along (inferior→superior, posterior→anterior, left→right)
pub type Shape = [usize; 3];

/// Number of voxels in a volume of the given shape, or `None` when a
/// one-byte-per-voxel buffer of that shape would not be addressable.
pub fn voxel_count(shape: &Shape) -> Option<usize> {
    checked_voxel_count(shape, 1)
}

/// Number of voxels in a volume of the given shape, or `None` when a buffer
/// of `element_size` bytes per voxel would exceed `isize::MAX` bytes.
///
/// Zero-length axes are skipped in the bound, as ndarray does.
pub fn checked_voxel_count(shape: &Shape, element_size: usize) -> Option<usize> {
    let addressable = shape
        .iter()
        .filter(|&&length| length != 0)
        .try_fold(element_size, |bytes, &length| bytes.checked_mul(length))
        .is_some_and(|bytes| bytes <= isize::MAX as usize);
    addressable.then(|| shape.iter().product())
}

/// Shape of an ndarray volume as a fixed-size array
pub fn shape_of<T>(array: &Array3<T>) -> Shape {
    let (d, h, w) = array.dim();
    [d, h, w]
}

/// Minimal axis-aligned index range covering every true voxel of a mask.
///
/// Both corners are inclusive. Serialized as `[[i0, j0, k0], [i1, j1, k1]]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[Coordinates3; 2]", into = "[Coordinates3; 2]")]
pub struct BoundingBox {
    pub min: Coordinates3,
    pub max: Coordinates3,
}

impl From<[Coordinates3; 2]> for BoundingBox {
    fn from(corners: [Coordinates3; 2]) -> Self {
        Self {
            min: corners[0],
            max: corners[1],
        }
    }
}

impl From<BoundingBox> for [Coordinates3; 2] {
    fn from(bounding_box: BoundingBox) -> Self {
        [bounding_box.min, bounding_box.max]
    }
}

impl BoundingBox {
    pub fn new(min: Coordinates3, max: Coordinates3) -> Self {
        Self { min, max }
    }

    /// Compute the bounding box of a mask, or `None` when no voxel is set.
    pub fn of_mask(mask: &Array3<bool>) -> Option<Self> {
        let mut min = [usize::MAX; 3];
        let mut max = [0usize; 3];
        let mut any = false;

        for ((i, j, k), &value) in mask.indexed_iter() {
            if !value {
                continue;
            }
            any = true;
            for (axis, coord) in [i, j, k].into_iter().enumerate() {
                min[axis] = min[axis].min(coord);
                max[axis] = max[axis].max(coord);
            }
        }

        any.then_some(Self { min, max })
    }

    /// Shape of the cropped sub-volume. Fails for inverted corners.
    pub fn shape(&self) -> Result<Shape> {
        let mut shape = [0; 3];
        for (axis, length) in shape.iter_mut().enumerate() {
            *length = self.max[axis]
                .checked_sub(self.min[axis])
                .and_then(|extent| extent.checked_add(1))
                .ok_or_else(|| {
                    GmhError::Validation(format!(
                        "bounding box {:?}..={:?} is inverted",
                        self.min, self.max
                    ))
                })?;
        }
        Ok(shape)
    }

    pub fn voxel_count(&self) -> Result<usize> {
        let shape = self.shape()?;
        voxel_count(&shape).ok_or_else(|| {
            GmhError::Validation(format!("bounding box shape {:?} is too large", shape))
        })
    }

    /// Corners ordered and inside a volume of the given shape
    pub fn fits_within(&self, shape: &Shape) -> bool {
        (0..3).all(|axis| self.min[axis] <= self.max[axis] && self.max[axis] < shape[axis])
    }

    /// View of the sub-volume of `array` covered by this box.
    pub fn crop<'a, T>(&self, array: &'a Array3<T>) -> Result<ArrayView3<'a, T>> {
        if !self.fits_within(&shape_of(array)) {
            return Err(GmhError::Validation(format!(
                "bounding box {:?}..={:?} exceeds volume shape {:?}",
                self.min,
                self.max,
                shape_of(array)
            )));
        }

        Ok(array.slice(s![
            self.min[0]..=self.max[0],
            self.min[1]..=self.max[1],
            self.min[2]..=self.max[2]
        ]))
    }

    /// Zero-expand a cropped mask back to the full volume shape.
    pub fn expand(&self, cropped: &Array3<bool>, shape: Shape) -> Result<Array3<bool>> {
        if !self.fits_within(&shape) {
            return Err(GmhError::Corruption(format!(
                "bounding box {:?}..={:?} exceeds volume shape {:?}",
                self.min, self.max, shape
            )));
        }
        let expected = self.shape()?;
        if shape_of(cropped) != expected {
            return Err(GmhError::Corruption(format!(
                "cropped mask has shape {:?}, bounding box requires {:?}",
                shape_of(cropped),
                expected
            )));
        }

        let mut full = Array3::from_elem((shape[0], shape[1], shape[2]), false);
        full.slice_mut(s![
            self.min[0]..=self.max[0],
            self.min[1]..=self.max[1],
            self.min[2]..=self.max[2]
        ])
        .assign(cropped);

        Ok(full)
    }
}
