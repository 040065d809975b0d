//! Seam to the external segmentation engine.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{SegmentError, SegmentResult};
use crate::options::SegmentOptions;

/// Lines of engine stderr kept in a failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Runs the engine on `input` and leaves its result at `output`.
///
/// Dropping the returned future must abandon the run; the watchdog relies on
/// this to reclaim a hung engine.
#[async_trait]
pub trait Segmenter: Send + Sync {
    async fn segment(
        &self,
        input: &Path,
        output: &Path,
        options: &SegmentOptions,
    ) -> SegmentResult<()>;
}

/// Launches the engine's command line program once per request.
#[derive(Debug, Clone)]
pub struct CliSegmenter {
    program: PathBuf,
    launcher_args: Vec<String>,
}

impl CliSegmenter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            launcher_args: Vec::new(),
        }
    }

    /// Arguments placed before `-i`, e.g. `-m totalsegmentator` for a Python launcher.
    pub fn with_launcher_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.launcher_args = args.into_iter().collect();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, input: &Path, output: &Path, options: &SegmentOptions) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.launcher_args)
            .arg("-i")
            .arg(input)
            .arg("-o")
            .arg(output)
            .args(options.to_cli_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Segmenter for CliSegmenter {
    async fn segment(
        &self,
        input: &Path,
        output: &Path,
        options: &SegmentOptions,
    ) -> SegmentResult<()> {
        tracing::info!(
            program = %self.program.display(),
            input = %input.display(),
            output = %output.display(),
            task = %options.task,
            "launching segmentation engine"
        );

        let result = self
            .command(input, output, options)
            .output()
            .await
            .map_err(|e| {
                SegmentError::Segmentation(format!(
                    "failed to launch {}: {e}",
                    self.program.display()
                ))
            })?;

        if !result.status.success() {
            tracing::warn!(status = %result.status, "segmentation engine exited with failure");
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(SegmentError::Segmentation(stderr_tail(&stderr)));
        }

        tracing::info!("segmentation engine finished");
        Ok(())
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Run the engine's weight downloader once per task.
///
/// Failing tasks are logged and skipped. Returns how many tasks succeeded.
pub async fn fetch_weights(program: &Path, tasks: &[String]) -> usize {
    let mut fetched = 0;
    for task in tasks {
        let status = Command::new(program)
            .arg("-t")
            .arg(task)
            .stdin(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => {
                tracing::info!(task = %task, "weights downloaded");
                fetched += 1;
            }
            Ok(status) => tracing::warn!(task = %task, %status, "weight download failed, skipping"),
            Err(e) => tracing::warn!(task = %task, error = %e, "could not launch weight downloader, skipping"),
        }
    }
    fetched
}
