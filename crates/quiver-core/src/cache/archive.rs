//! Skill package archives: download and path-safe extraction.

use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::Context;

/// Download a package archive.
pub(crate) async fn download(url: &str, timeout: Duration) -> anyhow::Result<Vec<u8>> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to download skill package from {}", url))?;

    if !response.status().is_success() {
        anyhow::bail!(
            "Failed to download skill package: HTTP {} from {}",
            response.status(),
            url
        );
    }

    let bytes = response
        .bytes()
        .await
        .with_context(|| format!("Failed to read response body from {}", url))?;
    Ok(bytes.to_vec())
}

/// Extract a zip archive into `dest`.
///
/// Entries whose paths would escape `dest` are skipped.
pub(crate) fn extract(data: &[u8], dest: &Path) -> anyhow::Result<usize> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create extract directory: {}", dest.display()))?;

    let cursor = std::io::Cursor::new(data);
    let mut archive =
        zip::ZipArchive::new(cursor).context("Failed to read skill package as zip archive")?;

    let mut written = 0;
    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .with_context(|| format!("Failed to read zip entry {}", i))?;

        let outpath = match file.enclosed_name() {
            Some(path) => dest.join(path),
            None => {
                tracing::warn!(entry = file.name(), "Skipping archive entry with unsafe path");
                continue;
            }
        };

        if file.is_dir() {
            std::fs::create_dir_all(&outpath).with_context(|| {
                format!("Failed to create directory: {}", outpath.display())
            })?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create parent directory: {}", parent.display())
            })?;
        }

        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)
            .with_context(|| format!("Failed to read zip entry: {}", file.name()))?;
        let mut outfile = std::fs::File::create(&outpath)
            .with_context(|| format!("Failed to create file: {}", outpath.display()))?;
        outfile
            .write_all(&buffer)
            .with_context(|| format!("Failed to write file: {}", outpath.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                if let Err(e) =
                    std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))
                {
                    tracing::warn!(path = %outpath.display(), error = %e, "Failed to apply archived file mode");
                }
            }
        }
        written += 1;
    }

    Ok(written)
}
