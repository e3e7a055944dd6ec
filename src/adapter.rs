//! Reading and writing images as gmh containers

use crate::compression::{CompressionLevel, CompressionMethod};
use crate::error::{GmhError, Result};
use crate::image::Image;
use crate::io::{
    extract_to_temporary, parent_dir, ArchiveDataLoader, CachedDataLoader, DataLoader,
};
use crate::archive::ArchiveWriter;
use crate::manifest::Manifest;
use crate::segment::Segment;
use crate::slice::Slice;
use crate::slug::{RandomSlugGenerator, SlugGenerator};
use crate::tool::SystemTar;
use crate::types::{is_valid_slug, sanitize_identifier};
use crate::utils::{
    format_bytes, mask_member_name, mask_to_bytes, samples_to_bytes, IMAGE_DATA_MEMBER,
    MANIFEST_MEMBER,
};
use ndarray::Array3;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info};

/// Candidates drawn per segment before slug minting gives up
const MAX_SLUG_ATTEMPTS: usize = 1000;

/// Options for [`Adapter::read`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Read through a persistent cache directory next to the container
    pub cached: bool,

    /// Unpack with the system tar when one is available
    pub allow_system_tar: bool,

    /// Check the manifest beyond its structure
    pub validate_manifest: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            cached: false,
            allow_system_tar: true,
            validate_manifest: true,
        }
    }
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    pub fn with_system_tar(mut self, allow: bool) -> Self {
        self.allow_system_tar = allow;
        self
    }

    pub fn with_manifest_validation(mut self, validate: bool) -> Self {
        self.validate_manifest = validate;
        self
    }
}

/// Options for [`Adapter::write`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Gzip the container
    pub compress: bool,

    /// Only honored by the in-process writer; the system tar uses its own default.
    pub compression_level: CompressionLevel,

    /// Pack with the system tar when one is available
    pub allow_system_tar: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compress: false,
            compression_level: CompressionLevel::default(),
            allow_system_tar: true,
        }
    }
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_compression_level(mut self, level: CompressionLevel) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_system_tar(mut self, allow: bool) -> Self {
        self.allow_system_tar = allow;
        self
    }

    fn compression(&self) -> CompressionMethod {
        if self.compress {
            CompressionMethod::Gzip
        } else {
            CompressionMethod::None
        }
    }
}

/// Entry point for persisting images.
///
/// # Example
///
/// ```rust,no_run
/// use gmh::{Adapter, ReadOptions, WriteOptions};
///
/// # fn example() -> gmh::Result<()> {
/// let adapter = Adapter::new();
/// let image = adapter.read("scan.gmh", &ReadOptions::default().with_cache(true))?;
/// adapter.write(&image, "copy.gmh", &WriteOptions::default().with_compression(true))?;
/// # Ok(())
/// # }
/// ```
pub struct Adapter {
    tool: Option<SystemTar>,
    slug_generator: Box<dyn SlugGenerator>,
}

impl Default for Adapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Adapter {
    /// Adapter using the system tar if this platform has a working one.
    pub fn new() -> Self {
        Self {
            tool: SystemTar::detect(),
            slug_generator: Box::new(RandomSlugGenerator::default()),
        }
    }

    /// Always use the in-process archive reader and writer.
    pub fn without_system_tar(mut self) -> Self {
        self.tool = None;
        self
    }

    pub fn with_system_tar(mut self, tool: SystemTar) -> Self {
        self.tool = Some(tool);
        self
    }

    pub fn with_slug_generator(mut self, generator: Box<dyn SlugGenerator>) -> Self {
        self.slug_generator = generator;
        self
    }

    pub fn system_tar(&self) -> Option<&SystemTar> {
        self.tool.as_ref()
    }

    /// Whether the file at `path` starts with the gzip magic bytes
    pub fn is_compressed(path: impl AsRef<Path>) -> Result<bool> {
        Ok(CompressionMethod::detect(path)?.is_compressed())
    }

    fn tool_for(&self, allowed: bool) -> Option<&SystemTar> {
        if allowed {
            self.tool.as_ref()
        } else {
            None
        }
    }

    /// Read the container at `path`.
    ///
    /// Samples and non-empty masks are fetched on first access; the returned
    /// image keeps the container (or its extraction) open until it is dropped.
    pub fn read(&self, path: impl AsRef<Path>, options: &ReadOptions) -> Result<Image> {
        let path = path.as_ref();
        info!("Reading gmh container from {}", path.display());

        if !path.is_file() {
            return Err(GmhError::Precondition(format!(
                "{} is not a readable file",
                path.display()
            )));
        }

        let compression = CompressionMethod::detect(path)?;
        let identifier = path
            .file_stem()
            .map(|stem| sanitize_identifier(&stem.to_string_lossy()))
            .filter(|identifier| !identifier.is_empty());

        let loader = self.open_loader(path, compression, options)?;
        info!(
            "Opened {:?} container via {:?} loader",
            compression,
            loader.strategy()
        );

        assemble(identifier, loader)
    }

    fn open_loader(
        &self,
        path: &Path,
        compression: CompressionMethod,
        options: &ReadOptions,
    ) -> Result<Arc<dyn DataLoader>> {
        let tool = self.tool_for(options.allow_system_tar);
        let validate = options.validate_manifest;

        if options.cached {
            return Ok(Arc::new(CachedDataLoader::open(
                path,
                compression,
                tool,
                validate,
            )?));
        }
        if let Some(tool) = tool {
            return Ok(Arc::new(extract_to_temporary(
                path,
                compression,
                Some(tool),
                validate,
            )?));
        }
        Ok(Arc::new(ArchiveDataLoader::open(path, compression, validate)?))
    }

    /// Write `image` to a new container at `path`.
    ///
    /// The container is assembled under a temporary name next to `path` and
    /// moved into place once complete. An existing file at `path` is never
    /// replaced.
    pub fn write(
        &self,
        image: &Image,
        path: impl AsRef<Path>,
        options: &WriteOptions,
    ) -> Result<()> {
        let path = path.as_ref();
        info!("Writing gmh container to {}", path.display());

        if path.exists() {
            return Err(GmhError::Precondition(format!(
                "{} already exists",
                path.display()
            )));
        }

        let slugs = self.assign_slugs(image)?;
        let manifest = Manifest::build(image, &slugs)?;
        let members = collect_members(image, &manifest)?;
        let total: usize = members.iter().map(|(_, data)| data.len()).sum();
        debug!(
            "Prepared {} members ({})",
            members.len(),
            format_bytes(total as u64)
        );

        match self.tool_for(options.allow_system_tar) {
            Some(tool) => write_with_tool(tool, &members, options.compression(), path),
            None => write_in_process(
                &members,
                options.compression(),
                options.compression_level,
                path,
            ),
        }
    }

    /// Keep each segment's valid, unshared slug and mint fresh ones for the rest.
    fn assign_slugs(&self, image: &Image) -> Result<HashMap<String, String>> {
        let segments = image.ordered_segments();
        let mut slugs = HashMap::with_capacity(segments.len());
        let mut taken = HashSet::new();

        for segment in &segments {
            if let Some(slug) = segment.slug() {
                if is_valid_slug(slug) && taken.insert(slug.to_string()) {
                    slugs.insert(segment.identifier().to_string(), slug.to_string());
                }
            }
        }

        for segment in &segments {
            if slugs.contains_key(segment.identifier()) {
                continue;
            }
            let slug = self.mint_slug(segment, &taken)?;
            taken.insert(slug.clone());
            slugs.insert(segment.identifier().to_string(), slug);
        }

        Ok(slugs)
    }

    fn mint_slug(&self, segment: &Segment, taken: &HashSet<String>) -> Result<String> {
        for _ in 0..MAX_SLUG_ATTEMPTS {
            let candidate = self.slug_generator.generate();
            if is_valid_slug(&candidate) && !taken.contains(&candidate) {
                return Ok(candidate);
            }
        }
        Err(GmhError::Validation(format!(
            "no unused slug for segment {:?} after {} attempts",
            segment.identifier(),
            MAX_SLUG_ATTEMPTS
        )))
    }
}

/// Build the lazy image graph a loader's manifest describes.
fn assemble(identifier: Option<String>, loader: Arc<dyn DataLoader>) -> Result<Image> {
    let manifest = loader.manifest();
    let shape = manifest.image.size;

    let mut image = Image::lazy(Arc::clone(&loader))?;
    image.set_identifier(identifier.as_deref())?;
    image.set_voxel_size(manifest.image.voxel_size)?;
    image.set_voxel_spacing(manifest.image.voxel_spacing)?;
    image.meta_data_mut().extend(manifest.meta_data.clone());

    for record in &manifest.slices {
        let mut slice = Slice::new(&image, record.index, record.identifier.as_deref())?;
        slice.meta_data_mut().extend(record.meta_data.clone());
        image.register_slice(slice)?;
    }

    for record in &manifest.segments {
        let mut segment = match &record.slug {
            Some(slug) => Segment::lazy(
                &image,
                &record.identifier,
                slug,
                record.bounding_box,
                Arc::clone(&loader),
            )?,
            // empty masks have no payload
            None => Segment::new(
                &image,
                &record.identifier,
                Some(Array3::from_elem(shape, false)),
            )?,
        };
        segment.set_color(record.color);
        segment.meta_data_mut().extend(record.meta_data.clone());
        image.register_segment(segment)?;
    }

    debug!(
        "Assembled image with {} slices and {} segments",
        manifest.slices.len(),
        manifest.segments.len()
    );
    Ok(image)
}

/// Member payloads in container order: manifest, samples, then cropped masks.
fn collect_members(image: &Image, manifest: &Manifest) -> Result<Vec<(String, Vec<u8>)>> {
    let mut members = Vec::with_capacity(2 + manifest.segments.len());
    members.push((MANIFEST_MEMBER.to_string(), manifest.to_json()?));
    members.push((IMAGE_DATA_MEMBER.to_string(), samples_to_bytes(image.samples()?)));

    for record in &manifest.segments {
        let (Some(slug), Some(bounding_box)) = (&record.slug, &record.bounding_box) else {
            continue;
        };
        let segment = image.segment(&record.identifier).ok_or_else(|| {
            GmhError::Schema(format!("manifest names unknown segment {:?}", record.identifier))
        })?;
        let cropped = bounding_box.crop(segment.mask()?)?;
        members.push((mask_member_name(slug), mask_to_bytes(cropped.iter())));
    }

    Ok(members)
}

fn write_with_tool(
    tool: &SystemTar,
    members: &[(String, Vec<u8>)],
    compression: CompressionMethod,
    path: &Path,
) -> Result<()> {
    let staging = TempDir::new()?;
    for (name, data) in members {
        fs::write(staging.path().join(name), data)?;
    }
    let names: Vec<String> = members.iter().map(|(name, _)| name.clone()).collect();

    let target = NamedTempFile::new_in(parent_dir(path))?.into_temp_path();
    tool.create(staging.path(), &names, compression, &target)?;
    target
        .persist_noclobber(path)
        .map_err(|err| GmhError::Io(err.error))?;

    debug!("Packed {} with {}", path.display(), tool.program().display());
    Ok(())
}

fn write_in_process(
    members: &[(String, Vec<u8>)],
    compression: CompressionMethod,
    level: CompressionLevel,
    path: &Path,
) -> Result<()> {
    let file = NamedTempFile::new_in(parent_dir(path))?;
    let mut writer = ArchiveWriter::new(BufWriter::new(file), compression, level);
    for (name, data) in members {
        writer.append(name, data)?;
    }
    let file = writer
        .finish()?
        .into_inner()
        .map_err(|err| GmhError::Io(err.into_error()))?;
    file.as_file().sync_all()?;
    file.persist_noclobber(path)
        .map_err(|err| GmhError::Io(err.error))?;

    debug!("Packed {} in process", path.display());
    Ok(())
}
