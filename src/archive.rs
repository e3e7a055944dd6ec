//! In-process tar access: indexed member reads, member-by-member writes and unpacking

use crate::compression::{CompressionLevel, CompressionMethod, ContainerWriter};
use crate::error::{GmhError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tar::{Archive, Builder, EntryType, Header};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct MemberLocation {
    /// Offset of the payload within the (decompressed) tar stream
    offset: u64,
    size: u64,
}

/// Open handle onto a container, resolving members by exact name.
///
/// Plain containers are read by seeking straight to a member's payload.
/// Gzip streams cannot seek, so every read re-inflates the stream from the
/// start up to the requested member.
pub struct ArchiveReader {
    path: PathBuf,
    compression: CompressionMethod,
    file: Mutex<File>,
    members: HashMap<String, MemberLocation>,
}

fn member_name<R: Read>(entry: &tar::Entry<'_, R>) -> Result<String> {
    let path = entry.path()?;
    Ok(path.to_string_lossy().trim_start_matches("./").to_string())
}

fn truncated(err: std::io::Error, name: &str) -> GmhError {
    if err.kind() == ErrorKind::UnexpectedEof {
        GmhError::Corruption(format!("archive member `{}` is truncated", name))
    } else {
        GmhError::Io(err)
    }
}

impl ArchiveReader {
    pub fn open(path: impl AsRef<Path>, compression: CompressionMethod) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let members = Self::index(&mut file, compression)?;

        debug!(
            "Indexed {} members of {} ({:?})",
            members.len(),
            path.display(),
            compression
        );

        Ok(Self {
            path,
            compression,
            file: Mutex::new(file),
            members,
        })
    }

    fn index(
        file: &mut File,
        compression: CompressionMethod,
    ) -> Result<HashMap<String, MemberLocation>> {
        file.seek(SeekFrom::Start(0))?;
        let mut archive = Archive::new(compression.reader(&mut *file));
        let mut members = HashMap::new();

        for entry in archive.entries()? {
            let entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            members.insert(
                member_name(&entry)?,
                MemberLocation {
                    offset: entry.raw_file_position(),
                    size: entry.size(),
                },
            );
        }

        Ok(members)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn compression(&self) -> CompressionMethod {
        self.compression
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    /// Names of all regular-file members
    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    /// Read the full payload of the member called `name`.
    pub fn read_member(&self, name: &str) -> Result<Bytes> {
        let location = *self
            .members
            .get(name)
            .ok_or_else(|| GmhError::missing_member(name))?;
        let mut file = self.file.lock();

        match self.compression {
            CompressionMethod::None => {
                file.seek(SeekFrom::Start(location.offset))?;
                let mut payload = vec![0u8; location.size as usize];
                file.read_exact(&mut payload)
                    .map_err(|e| truncated(e, name))?;
                Ok(Bytes::from(payload))
            }
            CompressionMethod::Gzip => {
                file.seek(SeekFrom::Start(0))?;
                let mut archive = Archive::new(self.compression.reader(&mut *file));
                for entry in archive.entries()? {
                    let mut entry = entry?;
                    if member_name(&entry)? != name {
                        continue;
                    }
                    let mut payload = Vec::with_capacity(location.size as usize);
                    entry
                        .read_to_end(&mut payload)
                        .map_err(|e| truncated(e, name))?;
                    return Ok(Bytes::from(payload));
                }
                Err(GmhError::missing_member(name))
            }
        }
    }
}

/// Builds a container member by member.
pub struct ArchiveWriter<W: Write> {
    builder: Builder<ContainerWriter<W>>,
    mtime: u64,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(inner: W, compression: CompressionMethod, level: CompressionLevel) -> Self {
        let mtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            builder: Builder::new(ContainerWriter::new(inner, compression, level)),
            mtime,
        }
    }

    /// Append a regular file member.
    pub fn append(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(self.mtime);
        self.builder.append_data(&mut header, name, data)?;
        Ok(())
    }

    /// Write the end-of-archive marker and flush the compressor.
    pub fn finish(self) -> Result<W> {
        let container = self.builder.into_inner()?;
        container.finish()
    }
}

/// Unpack the whole container at `path` into `destination`.
pub fn unpack(
    path: impl AsRef<Path>,
    compression: CompressionMethod,
    destination: impl AsRef<Path>,
) -> Result<()> {
    let file = File::open(path.as_ref())?;
    let mut archive = Archive::new(compression.reader(file));
    archive.unpack(destination.as_ref())?;
    Ok(())
}
