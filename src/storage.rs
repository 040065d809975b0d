//! On-disk handling of inputs and outputs.

use std::io;
use std::path::{Path, PathBuf};

use axum::body::Bytes;
use futures::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;

use crate::error::{SegmentError, SegmentResult};

const FALLBACK_FILE_NAME: &str = "input";

/// Delete and recreate each directory so a fresh process starts empty.
pub fn prepare_workspace<P: AsRef<Path>>(dirs: &[P]) -> io::Result<()> {
    for dir in dirs {
        let dir = dir.as_ref();
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        std::fs::create_dir_all(dir)?;
        tracing::debug!(dir = %dir.display(), "workspace directory ready");
    }
    Ok(())
}

pub fn timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `{dir}/{timestamp_ms}-{basename}`; directory components of `file_name` are dropped.
pub fn input_path(dir: &Path, timestamp_ms: i64, file_name: &str) -> PathBuf {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .unwrap_or(FALLBACK_FILE_NAME);
    dir.join(format!("{timestamp_ms}-{base}"))
}

pub fn output_path(dir: &Path, timestamp_ms: i64) -> PathBuf {
    dir.join(format!("{timestamp_ms}.nii.gz"))
}

pub fn has_archive_extension(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    lower.ends_with(".gz") || lower.ends_with(".zip")
}

/// Last path segment of `url`, or the fallback name when there is none.
pub fn url_file_name(url: &reqwest::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .unwrap_or(FALLBACK_FILE_NAME)
        .to_string()
}

/// Write a byte stream to `path`, returning the number of bytes written.
pub async fn persist_stream<S, E>(stream: S, path: &Path) -> SegmentResult<u64>
where
    S: Stream<Item = Result<Bytes, E>>,
    SegmentError: From<E>,
{
    let mut stream = std::pin::pin!(stream);
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    tracing::debug!(path = %path.display(), bytes = written, "input persisted");
    Ok(written)
}

/// Fetch `url` into `path`, chunk by chunk.
pub async fn download(client: &reqwest::Client, url: &reqwest::Url, path: &Path) -> SegmentResult<u64> {
    let response = client.get(url.clone()).send().await?;

    if !response.status().is_success() {
        return Err(SegmentError::Download(format!(
            "{} answered {}",
            url,
            response.status()
        )));
    }

    persist_stream(response.bytes_stream(), path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_names_are_timestamp_prefixed() {
        let path = input_path(Path::new("inputs"), 1700000000123, "scan.nii.gz");
        assert_eq!(path, Path::new("inputs/1700000000123-scan.nii.gz"));
    }

    #[test]
    fn input_names_drop_directories() {
        let path = input_path(Path::new("inputs"), 7, "../../etc/passwd.gz");
        assert_eq!(path, Path::new("inputs/7-passwd.gz"));
        let path = input_path(Path::new("inputs"), 7, "C:\\scans\\");
        assert_eq!(path, Path::new("inputs/7-input"));
    }

    #[test]
    fn output_names_are_nifti() {
        assert_eq!(
            output_path(Path::new("outputs"), 42),
            Path::new("outputs/42.nii.gz")
        );
    }

    #[test]
    fn archive_extensions() {
        assert!(has_archive_extension("ct.nii.gz"));
        assert!(has_archive_extension("SERIES.ZIP"));
        assert!(!has_archive_extension("ct.nii"));
        assert!(!has_archive_extension("notes.txt"));
    }

    #[test]
    fn url_names_use_the_last_segment() {
        let url = reqwest::Url::parse("https://host/data/ct.nii.gz?sig=abc").unwrap();
        assert_eq!(url_file_name(&url), "ct.nii.gz");
        let url = reqwest::Url::parse("https://host/").unwrap();
        assert_eq!(url_file_name(&url), "input");
    }

    #[test]
    fn prepare_workspace_clears_previous_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let inputs = tmp.path().join("inputs");
        let outputs = tmp.path().join("outputs");
        std::fs::create_dir_all(&inputs).unwrap();
        std::fs::write(inputs.join("stale.nii.gz"), b"old").unwrap();

        prepare_workspace(&[&inputs, &outputs]).unwrap();
        prepare_workspace(&[&inputs, &outputs]).unwrap();

        assert!(inputs.is_dir());
        assert!(outputs.is_dir());
        assert_eq!(std::fs::read_dir(&inputs).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn persist_stream_writes_all_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("upload.gz");
        let chunks = futures::stream::iter(vec![
            Ok::<_, SegmentError>(Bytes::from_static(b"abc")),
            Ok(Bytes::from_static(b"def")),
        ]);

        let written = persist_stream(chunks, &path).await.unwrap();

        assert_eq!(written, 6);
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }
}
