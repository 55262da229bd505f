//! Release asset downloads with progress tracking and checksum verification

use crate::error::{MicasaError, Result};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::Path;
use tokio::fs;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// True if the hex digest `actual` equals `expected`, ignoring case and surrounding
/// whitespace.
fn digest_matches(actual: &str, expected: &str) -> bool {
    actual.eq_ignore_ascii_case(expected.trim())
}

/// Download `url` to `destination`, showing a progress bar on a terminal.
///
/// When `sha256` is given the body is hashed as it streams and the file is removed on
/// mismatch.
pub async fn download_file(
    client: &reqwest::Client,
    url: &str,
    destination: &Path,
    sha256: Option<&str>,
    cancel: &CancellationToken,
) -> Result<()> {
    debug!("...downloading {} to {}...", url, destination.display());

    let mut response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(MicasaError::Cancelled),
        response = client.get(url).send() => response?,
    };

    let status = response.status();
    if !status.is_success() {
        return Err(MicasaError::Network(format!("GET {} returned {}", url, status)));
    }

    let label = destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| url.to_string());
    let pb = progress_bar(&label, response.content_length());

    let mut file = fs::File::create(destination).await?;
    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                pb.abandon();
                return Err(MicasaError::Cancelled);
            }
            chunk = response.chunk() => chunk?,
        };
        let Some(chunk) = chunk else {
            break;
        };
        file.write_all(&chunk).await?;
        hasher.update(&chunk);
        downloaded += chunk.len() as u64;
        pb.set_position(downloaded);
    }

    file.flush().await?;
    pb.finish_and_clear();

    debug!("...downloaded {} bytes", downloaded);

    if let Some(expected) = sha256 {
        let actual = format!("{:x}", hasher.finalize());
        if !digest_matches(&actual, expected) {
            debug!("...{} has sha256 {}, expected {}", label, actual, expected);
            drop(file);
            fs::remove_file(destination).await?;
            return Err(MicasaError::ChecksumMismatch(label));
        }
        debug!("...checksum verified for {}", label);
    }

    Ok(())
}

fn progress_bar(label: &str, total: Option<u64>) -> ProgressBar {
    let pb = ProgressBar::with_draw_target(total, ProgressDrawTarget::stderr());

    // Template is a constant, parse failures only happen while editing it
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(format!("⬇ {}", label));
    pb
}
