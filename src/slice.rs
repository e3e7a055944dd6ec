//! Annotated cross-sections of an image

use crate::error::{GmhError, Result};
use crate::image::{Image, ImageKey};
use crate::types::{validate_identifier, MetaData};

/// Annotation of one cross-section (first-axis index) of an image.
///
/// The slice does not hold pixel data; [`Image::slice_samples`] resolves its
/// view through the owning image.
#[derive(Debug, Clone)]
pub struct Slice {
    owner: ImageKey,
    index: usize,
    identifier: Option<String>,
    meta_data: MetaData,
}

impl Slice {
    /// Create a slice of `image`, not yet registered with it.
    pub fn new(image: &Image, index: usize, identifier: Option<&str>) -> Result<Self> {
        let depth = image
            .shape()
            .map(|shape| shape[0])
            .ok_or_else(|| GmhError::Validation("image has no sample data to slice".to_string()))?;
        if index >= depth {
            return Err(GmhError::Validation(format!(
                "slice index {} is outside of [0, {})",
                index, depth
            )));
        }
        if let Some(identifier) = identifier {
            validate_identifier("slice", identifier)?;
            if image.has_slice_identifier(identifier) {
                return Err(GmhError::Validation(format!(
                    "there already is a slice identified as {:?}",
                    identifier
                )));
            }
        }

        Ok(Self {
            owner: image.key(),
            index,
            identifier: identifier.map(str::to_string),
            meta_data: MetaData::new(),
        })
    }

    pub(crate) fn owner(&self) -> ImageKey {
        self.owner
    }

    /// Index along the inferior→superior axis
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub(crate) fn replace_identifier(&mut self, identifier: Option<String>) {
        self.identifier = identifier;
    }

    pub fn meta_data(&self) -> &MetaData {
        &self.meta_data
    }

    pub fn meta_data_mut(&mut self) -> &mut MetaData {
        &mut self.meta_data
    }
}
