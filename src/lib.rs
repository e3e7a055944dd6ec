//! gmh - volumetric images with segments, persisted as tar containers
//!
//! Models a 3-D image of 4-byte signed samples together with named boolean
//! segment masks and per-slice annotations, and stores it as a (optionally
//! gzip-compressed) tar archive with a JSON manifest.
//!
//! # Features
//!
//! - Lazy loading: samples and masks are fetched on first access
//! - Three loader strategies: in-process streaming, system `tar` extraction
//!   and a persistent, staleness-checked cache directory
//! - Sparse masks are stored cropped to their bounding box
//! - Writes never replace an existing file and never leave partial output
//!
//! # Example
//!
//! ```rust,no_run
//! use gmh::{Adapter, Image, ReadOptions, WriteOptions};
//! use ndarray::Array3;
//!
//! # fn example() -> gmh::Result<()> {
//! let mut image = Image::with_samples(Array3::zeros((16, 64, 64)));
//! image.set_identifier(Some("phantom"))?;
//! image.add_segment("empty", Array3::from_elem((16, 64, 64), false), None)?;
//!
//! let adapter = Adapter::new();
//! adapter.write(&image, "phantom.gmh", &WriteOptions::default())?;
//!
//! let image = adapter.read("phantom.gmh", &ReadOptions::default())?;
//! assert_eq!(image.samples()?.shape(), &[16, 64, 64]);
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod archive;
pub mod collection;
pub mod compression;
pub mod error;
pub mod image;
pub mod io;
pub mod layout;
pub mod lazy;
pub mod manifest;
pub mod segment;
pub mod slice;
pub mod slug;
pub mod tool;
pub mod types;
pub mod utils;

// Re-exports
pub use adapter::{Adapter, ReadOptions, WriteOptions};
pub use collection::ImageSet;
pub use compression::{CompressionLevel, CompressionMethod};
pub use error::{GmhError, Result};
pub use image::Image;
pub use io::{
    ArchiveDataLoader, CachedDataLoader, DataLoader, DirectoryDataLoader, LoaderStrategy,
};
pub use layout::{BoundingBox, Shape};
pub use manifest::Manifest;
pub use segment::Segment;
pub use slice::Slice;
pub use slug::{RandomSlugGenerator, SlugGenerator};
pub use tool::SystemTar;
pub use types::{Color, MetaData, Precision, Vector3};

/// Version of this crate
pub const GMH_VERSION: &str = env!("CARGO_PKG_VERSION");
