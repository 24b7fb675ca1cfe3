//! Build artifacts: `{name}_{version}.tar.zst` archives of a build's `out/`.
//!
//! An artifact's presence in the artifact directory is the only cache
//! signal, so it is written to a temporary file and renamed into place;
//! readers never observe a partial archive under the final name.

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::BufReader;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tar::Builder as TarBuilder;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::io::tmp_name;

/// Artifact file extension.
pub const ARTIFACT_EXT: &str = "tar.zst";

const ZSTD_LEVEL: i32 = 3;

/// File name of the artifact for `name` at `version`.
pub fn artifact_file_name(name: &str, version: &str) -> String {
    format!("{name}_{version}.{ARTIFACT_EXT}")
}

/// Path of the artifact for `name` at `version` inside `artifact_dir`.
pub fn artifact_path(artifact_dir: &Path, name: &str, version: &str) -> PathBuf {
    artifact_dir.join(artifact_file_name(name, version))
}

/// Archive `out_dir` into `{artifact_dir}/{name}_{version}.tar.zst`.
pub fn pack(out_dir: &Path, artifact_dir: &Path, name: &str, version: &str) -> Result<PathBuf> {
    if !out_dir.is_dir() {
        bail!("build output directory not found: {}", out_dir.display());
    }
    fs::create_dir_all(artifact_dir).with_context(|| {
        format!("Failed to create artifact directory {}", artifact_dir.display())
    })?;

    let dest = artifact_path(artifact_dir, name, version);
    let tmp = artifact_dir.join(tmp_name(&format!(".{}.tmp", artifact_file_name(name, version))));

    if let Err(e) = create_tar_zst(out_dir, &tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, &dest).with_context(|| {
        format!("Failed to move artifact {} to {}", tmp.display(), dest.display())
    })?;

    info!("packaged {}", dest.display());
    Ok(dest)
}

/// Extract `artifact` over `root`, merging with what is already there.
///
/// Directory entries whose destination already resolves to a directory,
/// including through a symlink, are merged into it. The symlink itself is
/// kept. Files and symlinks replace existing entries. Entries that would
/// land outside `root` are rejected.
pub fn extract(artifact: &Path, root: &Path) -> Result<()> {
    let file = File::open(artifact)
        .with_context(|| format!("Failed to open artifact {}", artifact.display()))?;
    let decoder = zstd::stream::Decoder::new(BufReader::new(file))
        .with_context(|| format!("Failed to read artifact {}", artifact.display()))?;
    let mut archive = tar::Archive::new(decoder);
    archive.set_overwrite(true);

    let entries = archive
        .entries()
        .with_context(|| format!("Failed to read artifact {}", artifact.display()))?;
    for entry in entries {
        let mut entry =
            entry.with_context(|| format!("Failed to read entry of {}", artifact.display()))?;
        let rel = entry.path()?.into_owned();
        if !is_contained(&rel) {
            bail!(
                "artifact '{}' contains unsafe path '{}'",
                artifact.display(),
                rel.display()
            );
        }
        if rel.as_os_str().is_empty() || rel == Path::new(".") {
            continue;
        }

        if entry.header().entry_type().is_dir() {
            let dst = root.join(&rel);
            // `is_dir` follows symlinks: a skeleton link like `lib -> usr/lib`
            // counts as an existing directory and is left in place.
            if dst.is_dir() {
                continue;
            }
            if dst.is_symlink() {
                fs::remove_file(&dst)
                    .with_context(|| format!("Failed to replace symlink {}", dst.display()))?;
            }
            fs::create_dir_all(&dst)
                .with_context(|| format!("Failed to create directory {}", dst.display()))?;
            if let Ok(mode) = entry.header().mode() {
                fs::set_permissions(&dst, fs::Permissions::from_mode(mode))?;
            }
            continue;
        }

        entry.set_preserve_permissions(true);
        let unpacked = entry.unpack_in(root).with_context(|| {
            format!(
                "Failed to extract {} from {} into {}",
                rel.display(),
                artifact.display(),
                root.display()
            )
        })?;
        if !unpacked {
            bail!(
                "artifact '{}' entry '{}' escapes '{}'",
                artifact.display(),
                rel.display(),
                root.display()
            );
        }
    }

    debug!("extracted {} into {}", artifact.display(), root.display());
    Ok(())
}

fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Write `src_dir` as a deterministic tar stream compressed with zstd.
///
/// Entries are sorted by relative path with zeroed mtime and ownership, so
/// identical outputs produce identical archives.
fn create_tar_zst(src_dir: &Path, out_path: &Path) -> Result<()> {
    let out = File::create(out_path)
        .with_context(|| format!("Failed to create {}", out_path.display()))?;
    let encoder = zstd::stream::Encoder::new(out, ZSTD_LEVEL)?;
    let mut builder = TarBuilder::new(encoder);
    builder.follow_symlinks(false);

    let mut entries: Vec<PathBuf> = vec![];
    for ent in WalkDir::new(src_dir).follow_links(false) {
        let ent = ent.with_context(|| format!("Failed to walk {}", src_dir.display()))?;
        if ent.path() == src_dir {
            continue;
        }
        entries.push(ent.into_path());
    }
    entries.sort_by(|a, b| {
        let ra = a.strip_prefix(src_dir).unwrap_or(a);
        let rb = b.strip_prefix(src_dir).unwrap_or(b);
        ra.cmp(rb)
    });

    for p in entries {
        let rel = p.strip_prefix(src_dir).unwrap_or(&p).to_path_buf();
        let md = fs::symlink_metadata(&p)
            .with_context(|| format!("Failed to read metadata of {}", p.display()))?;

        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(md.permissions().mode() & 0o7777);

        if md.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            builder.append_data(&mut header, &rel, std::io::empty())?;
        } else if md.file_type().is_symlink() {
            let target = fs::read_link(&p)?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            builder.append_link(&mut header, &rel, &target)?;
        } else if md.is_file() {
            let mut f =
                File::open(&p).with_context(|| format!("Failed to open {}", p.display()))?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(md.len());
            builder.append_data(&mut header, &rel, &mut f)?;
        } else {
            bail!("unsupported file type in build output: {}", p.display());
        }
    }

    let encoder = builder.into_inner().context("Failed to finish tar stream")?;
    encoder.finish().context("Failed to finish zstd stream")?;
    Ok(())
}
