//! Data loaders: interchangeable back ends that fetch raw payloads on demand

use crate::archive::{self, ArchiveReader};
use crate::compression::CompressionMethod;
use crate::error::{GmhError, Result};
use crate::layout::BoundingBox;
use crate::lazy::Fetch;
use crate::manifest::Manifest;
use crate::tool::SystemTar;
use crate::utils::{
    bytes_to_mask, bytes_to_samples, format_bytes, mask_member_name, IMAGE_DATA_MEMBER,
    MANIFEST_MEMBER,
};
use bytes::Bytes;
use ndarray::Array3;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Loader strategies, in the order the adapter prefers them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderStrategy {
    /// Persistent, staleness-checked extraction next to the source file
    Cached,
    /// Throw-away extraction by the system tar
    Extracted,
    /// Member reads straight from the container
    Streaming,
}

/// Fetches the image samples and segment masks a manifest describes.
///
/// Implementors only resolve raw member payloads; decoding and bounding-box
/// expansion are shared. Loads are repeatable and do not memoize.
pub trait DataLoader: Send + Sync {
    /// The manifest of the container this loader reads from
    fn manifest(&self) -> &Manifest;

    /// Full payload of the named member
    fn read_member(&self, name: &str) -> Result<Bytes>;

    fn strategy(&self) -> LoaderStrategy;

    /// Decode the image samples into the manifest-declared shape.
    fn load_image_samples(&self) -> Result<Array3<i32>> {
        let payload = self.read_member(IMAGE_DATA_MEMBER)?;
        debug!("Loaded image samples ({})", format_bytes(payload.len() as u64));
        bytes_to_samples(&payload, self.manifest().image.size)
    }

    /// Decode a segment mask, zero-expanding a payload stored under a bounding box.
    fn load_segment_mask(
        &self,
        slug: &str,
        bounding_box: Option<&BoundingBox>,
    ) -> Result<Array3<bool>> {
        let shape = self.manifest().image.size;
        let payload = self.read_member(&mask_member_name(slug))?;
        debug!("Loaded mask {} ({})", slug, format_bytes(payload.len() as u64));

        match bounding_box {
            Some(bounding_box) => {
                if !bounding_box.fits_within(&shape) {
                    return Err(GmhError::Corruption(format!(
                        "bounding box {:?}..={:?} of mask {} exceeds image shape {:?}",
                        bounding_box.min, bounding_box.max, slug, shape
                    )));
                }
                let cropped = bytes_to_mask(&payload, bounding_box.shape()?)?;
                bounding_box.expand(&cropped, shape)
            }
            None => bytes_to_mask(&payload, shape),
        }
    }
}

/// Lazy source of an image's samples
pub(crate) struct ImageSamplesSource {
    loader: Arc<dyn DataLoader>,
}

impl ImageSamplesSource {
    pub(crate) fn new(loader: Arc<dyn DataLoader>) -> Self {
        Self { loader }
    }
}

impl Fetch<Array3<i32>> for ImageSamplesSource {
    fn fetch(&self) -> Result<Array3<i32>> {
        self.loader.load_image_samples()
    }
}

/// Lazy source of one segment's mask
pub(crate) struct SegmentMaskSource {
    loader: Arc<dyn DataLoader>,
    slug: String,
    bounding_box: Option<BoundingBox>,
}

impl SegmentMaskSource {
    pub(crate) fn new(
        loader: Arc<dyn DataLoader>,
        slug: &str,
        bounding_box: Option<BoundingBox>,
    ) -> Self {
        Self {
            loader,
            slug: slug.to_string(),
            bounding_box,
        }
    }
}

impl Fetch<Array3<bool>> for SegmentMaskSource {
    fn fetch(&self) -> Result<Array3<bool>> {
        self.loader
            .load_segment_mask(&self.slug, self.bounding_box.as_ref())
    }
}

/// Streams members directly out of an open container.
pub struct ArchiveDataLoader {
    reader: ArchiveReader,
    manifest: Manifest,
}

impl ArchiveDataLoader {
    pub fn open(
        path: impl AsRef<Path>,
        compression: CompressionMethod,
        validate: bool,
    ) -> Result<Self> {
        let reader = ArchiveReader::open(path, compression)?;
        let manifest = Manifest::parse(&reader.read_member(MANIFEST_MEMBER)?, validate)?;
        Ok(Self { reader, manifest })
    }

    pub fn path(&self) -> &Path {
        self.reader.path()
    }
}

impl DataLoader for ArchiveDataLoader {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn read_member(&self, name: &str) -> Result<Bytes> {
        self.reader.read_member(name)
    }

    fn strategy(&self) -> LoaderStrategy {
        LoaderStrategy::Streaming
    }
}

#[derive(Debug)]
enum DirectoryRoot {
    /// Deleted when the loader is dropped
    Temporary(TempDir),
    /// Left in place when the loader is dropped
    Persistent(PathBuf),
}

impl DirectoryRoot {
    fn path(&self) -> &Path {
        match self {
            DirectoryRoot::Temporary(dir) => dir.path(),
            DirectoryRoot::Persistent(path) => path,
        }
    }
}

/// Reads members as plain files of a directory the container was unpacked into.
pub struct DirectoryDataLoader {
    root: DirectoryRoot,
    manifest: Manifest,
}

impl DirectoryDataLoader {
    /// Take ownership of a temporary extraction; it is removed on drop.
    pub fn extracted(dir: TempDir, validate: bool) -> Result<Self> {
        Self::new(DirectoryRoot::Temporary(dir), validate)
    }

    /// Read from a directory that outlives the loader.
    pub fn persistent(path: impl Into<PathBuf>, validate: bool) -> Result<Self> {
        Self::new(DirectoryRoot::Persistent(path.into()), validate)
    }

    fn new(root: DirectoryRoot, validate: bool) -> Result<Self> {
        if !root.path().is_dir() {
            return Err(GmhError::Precondition(format!(
                "{} is not a directory",
                root.path().display()
            )));
        }
        let manifest = Manifest::parse(&read_file_member(root.path(), MANIFEST_MEMBER)?, validate)?;
        Ok(Self { root, manifest })
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }
}

fn read_file_member(dir: &Path, name: &str) -> Result<Bytes> {
    match fs::read(dir.join(name)) {
        Ok(data) => Ok(Bytes::from(data)),
        Err(err) if err.kind() == ErrorKind::NotFound => Err(GmhError::missing_member(name)),
        Err(err) => Err(GmhError::Io(err)),
    }
}

impl DataLoader for DirectoryDataLoader {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn read_member(&self, name: &str) -> Result<Bytes> {
        read_file_member(self.root.path(), name)
    }

    fn strategy(&self) -> LoaderStrategy {
        LoaderStrategy::Extracted
    }
}

/// Unpack a container into a fresh temporary directory and read from there.
pub fn extract_to_temporary(
    path: &Path,
    compression: CompressionMethod,
    tool: Option<&SystemTar>,
    validate: bool,
) -> Result<DirectoryDataLoader> {
    let dir = TempDir::new()?;
    unpack_into(path, compression, tool, dir.path())?;
    DirectoryDataLoader::extracted(dir, validate)
}

fn unpack_into(
    path: &Path,
    compression: CompressionMethod,
    tool: Option<&SystemTar>,
    destination: &Path,
) -> Result<()> {
    match tool {
        Some(tool) => tool.extract(path, compression, destination),
        None => archive::unpack(path, compression, destination),
    }
}

/// Reads from a persistent extraction next to the source file.
///
/// The cache directory is `.cache-<file name>` beside the source and is
/// repopulated whenever the source's modification or status-change time is
/// newer than the directory's. It is never removed by this loader.
///
/// Population is staged in a temporary sibling directory and renamed into
/// place, and a cache another process renamed in first is reused. Replacing a
/// stale cache is not atomic though: two processes refreshing the same cache
/// at once may each remove the other's result before renaming their own.
pub struct CachedDataLoader {
    inner: DirectoryDataLoader,
    refreshed: bool,
}

impl CachedDataLoader {
    pub fn open(
        source: impl AsRef<Path>,
        compression: CompressionMethod,
        tool: Option<&SystemTar>,
        validate: bool,
    ) -> Result<Self> {
        let source = source.as_ref();
        if !source.is_file() {
            return Err(GmhError::Precondition(format!(
                "{} is not a file",
                source.display()
            )));
        }

        let cache_dir = cache_directory(source);
        let refreshed = if is_stale(source, &cache_dir)? {
            info!("Populating cache {}", cache_dir.display());
            populate(source, compression, tool, &cache_dir)?;
            true
        } else {
            debug!("Reusing cache {}", cache_dir.display());
            false
        };

        Ok(Self {
            inner: DirectoryDataLoader::persistent(cache_dir, validate)?,
            refreshed,
        })
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Whether opening had to (re)populate the cache
    pub fn was_refreshed(&self) -> bool {
        self.refreshed
    }
}

impl DataLoader for CachedDataLoader {
    fn manifest(&self) -> &Manifest {
        self.inner.manifest()
    }

    fn read_member(&self, name: &str) -> Result<Bytes> {
        self.inner.read_member(name)
    }

    fn strategy(&self) -> LoaderStrategy {
        LoaderStrategy::Cached
    }
}

/// Location of the persistent cache for a container
pub fn cache_directory(source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    parent_dir(source).join(format!(".cache-{}", name))
}

pub(crate) fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn is_stale(source: &Path, cache_dir: &Path) -> Result<bool> {
    let cache = match fs::metadata(cache_dir) {
        Ok(meta) if meta.is_dir() => meta,
        Ok(_) => return Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(err.into()),
    };
    let source = fs::metadata(source)?;

    let modified = cache.modified()? < source.modified()?;
    Ok(modified || status_changed_after(&cache, &source))
}

#[cfg(unix)]
fn status_changed_after(cache: &fs::Metadata, source: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    (cache.ctime(), cache.ctime_nsec()) < (source.ctime(), source.ctime_nsec())
}

#[cfg(not(unix))]
fn status_changed_after(_cache: &fs::Metadata, _source: &fs::Metadata) -> bool {
    false
}

fn populate(
    source: &Path,
    compression: CompressionMethod,
    tool: Option<&SystemTar>,
    cache_dir: &Path,
) -> Result<()> {
    let staging = tempfile::Builder::new()
        .prefix(".cache-staging-")
        .tempdir_in(parent_dir(source))?;
    unpack_into(source, compression, tool, staging.path())?;

    match fs::remove_dir_all(cache_dir) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    let staged = staging.keep();
    if let Err(err) = fs::rename(&staged, cache_dir) {
        let _ = fs::remove_dir_all(&staged);
        if cache_dir.is_dir() {
            warn!(
                "Cache {} was populated concurrently, reusing it",
                cache_dir.display()
            );
        } else {
            return Err(err.into());
        }
    }

    Ok(())
}
