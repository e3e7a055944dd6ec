//! In-memory sets of images indexed by identifier

use crate::error::{GmhError, Result};
use crate::image::Image;
use std::collections::BTreeMap;

/// Images keyed by their identifier.
///
/// Every member has an identifier, and no two members share one.
#[derive(Debug, Default)]
pub struct ImageSet {
    images: BTreeMap<String, Image>,
}

impl ImageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set, failing on the first image that cannot be added.
    pub fn from_images(images: impl IntoIterator<Item = Image>) -> Result<Self> {
        let mut set = Self::new();
        for image in images {
            set.add(image)?;
        }
        Ok(set)
    }

    pub fn add(&mut self, image: Image) -> Result<()> {
        let identifier = image
            .identifier()
            .ok_or_else(|| {
                GmhError::Validation("an image needs an identifier to join a set".to_string())
            })?
            .to_string();
        if self.images.contains_key(&identifier) {
            return Err(GmhError::Validation(format!(
                "there already is an image identified as {:?}",
                identifier
            )));
        }
        self.images.insert(identifier, image);
        Ok(())
    }

    pub fn remove_by_identifier(&mut self, identifier: &str) -> Result<Image> {
        self.images.remove(identifier).ok_or_else(|| unknown(identifier))
    }

    pub fn get_by_identifier(&self, identifier: &str) -> Result<&Image> {
        self.images.get(identifier).ok_or_else(|| unknown(identifier))
    }

    pub fn get_by_identifier_mut(&mut self, identifier: &str) -> Result<&mut Image> {
        self.images.get_mut(identifier).ok_or_else(|| unknown(identifier))
    }

    pub fn has_identifier(&self, identifier: &str) -> bool {
        self.images.contains_key(identifier)
    }

    pub fn images_having_segment<'a>(
        &'a self,
        segment: &'a str,
    ) -> impl Iterator<Item = &'a Image> + 'a {
        self.iter().filter(move |image| image.has_segment(segment))
    }

    pub fn images_not_having_segment<'a>(
        &'a self,
        segment: &'a str,
    ) -> impl Iterator<Item = &'a Image> + 'a {
        self.iter().filter(move |image| !image.has_segment(segment))
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Members in identifier order
    pub fn iter(&self) -> impl Iterator<Item = &Image> {
        self.images.values()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.images.keys().map(String::as_str)
    }
}

impl IntoIterator for ImageSet {
    type Item = Image;
    type IntoIter = std::collections::btree_map::IntoValues<String, Image>;

    fn into_iter(self) -> Self::IntoIter {
        self.images.into_values()
    }
}

fn unknown(identifier: &str) -> GmhError {
    GmhError::Validation(format!("there is no image identified as {:?}", identifier))
}
