//! Benchmark tool acquisition: download an upstream archive, extract it into
//! the scratch directory, and drive its autotools build.

use crate::exec;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Download `url` into `dest_dir`, returning the archive path. An existing
/// file of the same name is reused rather than re-fetched.
pub async fn download(url: &str, dest_dir: &Path) -> Result<PathBuf> {
    let file_name = url
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .context("download URL has no file name component")?;
    let dest = dest_dir.join(file_name);
    if dest.exists() {
        info!(path = %dest.display(), "reusing cached archive");
        return Ok(dest);
    }

    tokio::fs::create_dir_all(dest_dir)
        .await
        .with_context(|| format!("failed to create {}", dest_dir.display()))?;

    info!(%url, "downloading");
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("failed to fetch {url}"))?;
    if !response.status().is_success() {
        bail!("fetch of {url} returned HTTP {}", response.status());
    }
    let bytes = response
        .bytes()
        .await
        .with_context(|| format!("failed to read body of {url}"))?;
    tokio::fs::write(&dest, &bytes)
        .await
        .with_context(|| format!("failed to write {}", dest.display()))?;
    Ok(dest)
}

/// Extract a tarball or zip into `dest_dir` using the system tar/unzip.
pub async fn extract(archive: &Path, dest_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dest_dir)
        .await
        .with_context(|| format!("failed to create {}", dest_dir.display()))?;
    let archive_str = archive.to_string_lossy();
    let dest_str = dest_dir.to_string_lossy();

    let out = if archive_str.ends_with(".zip") {
        exec::run("unzip", &["-o", "-q", &archive_str, "-d", &dest_str]).await?
    } else {
        exec::run("tar", &["-xf", &archive_str, "-C", &dest_str]).await?
    };
    if !out.success() {
        bail!(
            "extraction of {} failed: {}",
            archive.display(),
            out.stderr_text().trim()
        );
    }
    Ok(())
}

/// "iperf-2.0.13.tar.gz" -> "iperf-2.0.13"; "master.zip" -> "master".
pub fn archive_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if let Some(idx) = name.find(".tar") {
        return name[..idx].to_string();
    }
    name.trim_end_matches(".zip")
        .trim_end_matches(".tgz")
        .to_string()
}

/// `./configure && make` in `dir`.
pub async fn configure_and_make(dir: &Path) -> Result<()> {
    info!(dir = %dir.display(), "building");
    let out = exec::sh_in(dir, "./configure && make").await?;
    if !out.success() {
        bail!(
            "build in {} failed: {}",
            dir.display(),
            last_lines(&out.stderr_text(), 5)
        );
    }
    Ok(())
}

/// `autoreconf -fi && ./configure && make` for checkouts without a configure
/// script (the uperf zip archive).
pub async fn autoreconf_configure_make(dir: &Path) -> Result<()> {
    info!(dir = %dir.display(), "building (autoreconf)");
    let out = exec::sh_in(dir, "autoreconf -fi && ./configure && make").await?;
    if !out.success() {
        bail!(
            "build in {} failed: {}",
            dir.display(),
            last_lines(&out.stderr_text(), 5)
        );
    }
    Ok(())
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}
