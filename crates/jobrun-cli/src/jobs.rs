//! Demo job bodies: directory copy for backup/restore and a checksum process.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use jobrun_engine::{JobBody, JobContext, JobError, JobOutput};

/// Copies a directory tree file by file, checking for cancellation between
/// files. Used for both backup (workspace -> backup) and restore
/// (backup -> workspace).
pub struct CopyTreeJob {
    source: PathBuf,
    target: PathBuf,
    throttle: Duration,
    created_target: bool,
    written: Vec<PathBuf>,
}

impl CopyTreeJob {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            throttle: Duration::ZERO,
            created_target: false,
            written: Vec::new(),
        }
    }

    /// Pause after each copied file (makes cancellation easy to observe).
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    fn copy_dir(&mut self, ctx: &JobContext, from: &Path, to: &Path) -> Result<(), JobError> {
        if !to.exists() {
            fs::create_dir_all(to)?;
        }
        let mut entries: Vec<_> = fs::read_dir(from)?.collect::<Result<_, _>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            ctx.check_cancelled()?;
            let path = entry.path();
            let dest = to.join(entry.file_name());
            if entry.file_type()?.is_dir() {
                self.copy_dir(ctx, &path, &dest)?;
            } else {
                fs::copy(&path, &dest)?;
                self.written.push(dest);
                if !self.throttle.is_zero() {
                    std::thread::sleep(self.throttle);
                }
            }
        }
        Ok(())
    }
}

impl JobBody for CopyTreeJob {
    fn run(&mut self, ctx: &JobContext) -> Result<JobOutput, JobError> {
        if !self.source.is_dir() {
            return Err(JobError::failed(format!(
                "Source directory does not exist: {}",
                self.source.display()
            )));
        }
        self.created_target = !self.target.exists();

        let (source, target) = (self.source.clone(), self.target.clone());
        self.copy_dir(ctx, &source, &target)?;

        info!(
            task_id = %ctx.task_id(),
            files = self.written.len(),
            target = %self.target.display(),
            "Directory copied"
        );
        Ok(JobOutput::empty())
    }

    fn on_cancelled(&mut self, ctx: &JobContext) {
        let removed = if self.created_target {
            fs::remove_dir_all(&self.target)
        } else {
            self.written.iter().try_for_each(|path| match fs::remove_file(path) {
                Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
                _ => Ok(()),
            })
        };
        match removed {
            Ok(()) => debug!(
                task_id = %ctx.task_id(),
                target = %self.target.display(),
                "Partial copy removed"
            ),
            Err(err) => warn!(
                task_id = %ctx.task_id(),
                target = %self.target.display(),
                error = %err,
                "Failed to remove partial copy"
            ),
        }
    }
}

const CHUNK_SIZE: usize = 64 * 1024;

/// Computes SHA-256 digests of its inputs and writes them to a result file.
pub struct ChecksumJob {
    inputs: Vec<PathBuf>,
    output_dir: PathBuf,
    output: Option<PathBuf>,
}

impl ChecksumJob {
    pub fn new(inputs: Vec<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            inputs,
            output_dir: output_dir.into(),
            output: None,
        }
    }
}

impl JobBody for ChecksumJob {
    fn run(&mut self, ctx: &JobContext) -> Result<JobOutput, JobError> {
        if self.inputs.is_empty() {
            return Err(JobError::failed("No input files given"));
        }

        let mut lines = String::new();
        for input in &self.inputs {
            let digest = sha256_file(ctx, input)?;
            lines.push_str(&format!("{digest}  {}\n", input.display()));
        }

        fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(format!("{}.sha256", ctx.task_id()));
        self.output = Some(path.clone());
        fs::File::create(&path)?.write_all(lines.as_bytes())?;

        Ok(JobOutput::single(path))
    }

    fn on_cancelled(&mut self, ctx: &JobContext) {
        let Some(path) = self.output.take() else {
            return;
        };
        match fs::remove_file(&path) {
            Ok(()) => debug!(
                task_id = %ctx.task_id(),
                path = %path.display(),
                "Partial checksum removed"
            ),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                task_id = %ctx.task_id(),
                path = %path.display(),
                error = %err,
                "Failed to remove partial checksum"
            ),
        }
    }
}

fn sha256_file(ctx: &JobContext, path: &Path) -> Result<String, JobError> {
    let mut file = fs::File::open(path)
        .map_err(|e| JobError::failed(format!("Cannot open {}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        ctx.check_cancelled()?;
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
