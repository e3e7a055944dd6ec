//! The system `tar` binary as a fast path for packing and unpacking containers.
//!
//! Invocations block until the child exits and carry no timeout: a hung
//! `tar` process hangs the calling thread.

use crate::compression::CompressionMethod;
use crate::error::{GmhError, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use tracing::debug;

/// Handle onto a working external archiving tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemTar {
    program: PathBuf,
}

impl SystemTar {
    /// Probe once per process for a usable `tar` on a supported platform.
    pub fn detect() -> Option<SystemTar> {
        static PROBE: OnceLock<Option<SystemTar>> = OnceLock::new();
        PROBE
            .get_or_init(|| {
                let found = cfg!(unix) && Self::responds(Path::new("tar"));
                debug!("System tar available: {}", found);
                found.then(|| SystemTar {
                    program: PathBuf::from("tar"),
                })
            })
            .clone()
    }

    /// Use a specific binary without probing it.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn responds(program: &Path) -> bool {
        Command::new(program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Unpack `archive` into the existing directory `destination`.
    pub fn extract(
        &self,
        archive: &Path,
        compression: CompressionMethod,
        destination: &Path,
    ) -> Result<()> {
        let mut command = Command::new(&self.program);
        command.arg("-x");
        if compression.is_compressed() {
            command.arg("-z");
        }
        command.arg("-f").arg(archive).arg("-C").arg(destination);
        self.run(command)
    }

    /// Pack `members` of `source_dir`, in order, into a new archive at `archive`.
    pub fn create(
        &self,
        source_dir: &Path,
        members: &[String],
        compression: CompressionMethod,
        archive: &Path,
    ) -> Result<()> {
        let mut command = Command::new(&self.program);
        command.arg("-c");
        if compression.is_compressed() {
            command.arg("-z");
        }
        command
            .arg("-f")
            .arg(archive)
            .arg("-C")
            .arg(source_dir)
            .arg("--")
            .args(members);
        self.run(command)
    }

    fn run(&self, mut command: Command) -> Result<()> {
        let rendered = format!("{:?}", command);
        debug!("Running {}", rendered);

        let output = command.stdin(Stdio::null()).output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(GmhError::ExternalTool {
                command: rendered,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
