//! # Archives
//!
//! Creates and extracts the gzip-compressed tar archives that hold backups.
//!
//! Member names are relative to the backed-up directory. On extraction every
//! member is resolved against the destination before anything is written: one
//! member that would land outside the destination rejects the whole archive.

use crate::error::{ArchiveError, Result, SecurityError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// Counts reported after creating or extracting an archive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveStats {
    pub files: u64,
    pub links: u64,
    pub bytes: u64,
}

/// A walked entry that goes into the archive.
#[derive(Debug, Clone)]
struct SourceEntry {
    path: PathBuf,
    size: u64,
    is_link: bool,
}

/// Writes `source` into a `.tar.gz` at `archive_path`.
///
/// Regular files are stored with their contents and symlinks as link
/// members; directories and special files are skipped. With `after` set,
/// only entries modified at or after that unix timestamp are included.
/// Any error while walking or appending aborts the whole archive and the
/// partially written file is removed.
pub fn create_archive(
    archive_path: &Path,
    source: &Path,
    after: Option<i64>,
    verbose: bool,
) -> Result<ArchiveStats> {
    if !source.is_dir() {
        return Err(ArchiveError::SourceNotFound(source.to_path_buf()).into());
    }

    let entries = collect_entries(source, after)?;
    write_collected(archive_path, source, &entries, verbose)
}

fn collect_entries(source: &Path, after: Option<i64>) -> Result<Vec<SourceEntry>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(ArchiveError::Walk)?;
        let file_type = entry.file_type();
        let is_link = file_type.is_symlink();
        if !file_type.is_file() && !is_link {
            continue;
        }

        // Not followed, so this is the link's own mtime for symlinks.
        let metadata = entry.metadata().map_err(ArchiveError::Walk)?;
        if let Some(after) = after {
            if modified_secs(&metadata) < after {
                continue;
            }
        }

        if is_link && !link_stays_inside(source, entry.path())? {
            eprintln!(
                "warning: skipping {}: link target is outside the backed-up directory",
                entry.path().display()
            );
            continue;
        }

        entries.push(SourceEntry {
            size: if is_link { 0 } else { metadata.len() },
            path: entry.into_path(),
            is_link,
        });
    }

    Ok(entries)
}

/// Whether a symlink could be restored: the same rule extraction applies.
fn link_stays_inside(source: &Path, link: &Path) -> Result<bool> {
    let target = fs::read_link(link)?;
    let member = link.strip_prefix(source).unwrap_or(link);
    Ok(check_link(source, member, &target, false).is_ok())
}

fn modified_secs(metadata: &fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Archives `entries` into `<archive_path>.part`, then renames it into
/// place. On any failure neither the partial nor the final file is left.
fn write_collected(
    archive_path: &Path,
    source: &Path,
    entries: &[SourceEntry],
    verbose: bool,
) -> Result<ArchiveStats> {
    if let Some(parent) = archive_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let partial = partial_path(archive_path);
    let written =
        write_archive(&partial, archive_path, source, entries, verbose).and_then(|stats| {
            fs::rename(&partial, archive_path)?;
            Ok(stats)
        });

    if written.is_err() {
        let _ = fs::remove_file(&partial);
    }
    written
}

fn write_archive(
    partial: &Path,
    archive_path: &Path,
    source: &Path,
    entries: &[SourceEntry],
    verbose: bool,
) -> Result<ArchiveStats> {
    let file = File::create(partial)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);

    let pb = create_progress_bar(entries.len() as u64, "Archiving", archive_path);
    let mut stats = ArchiveStats::default();

    for entry in entries {
        let relative = entry.path.strip_prefix(source).unwrap_or(&entry.path);
        pb.set_message(relative.display().to_string());

        builder
            .append_path_with_name(&entry.path, relative)
            .map_err(|source| ArchiveError::Append {
                path: entry.path.clone(),
                source,
            })?;

        if verbose {
            let marker = if entry.is_link { "  @" } else { "  +" };
            pb.println(format!(
                "  {} {}",
                colored::Colorize::green(marker),
                relative.display()
            ));
        }

        if entry.is_link {
            stats.links += 1;
        } else {
            stats.files += 1;
        }
        stats.bytes += entry.size;
        pb.inc(1);
    }

    builder.into_inner()?.finish()?;
    pb.finish_and_clear();

    Ok(stats)
}

fn partial_path(archive_path: &Path) -> PathBuf {
    let mut name = archive_path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn open_archive(archive_path: &Path) -> Result<tar::Archive<GzDecoder<File>>> {
    let file = File::open(archive_path).map_err(|source| ArchiveError::Read {
        path: archive_path.to_path_buf(),
        source,
    })?;
    Ok(tar::Archive::new(GzDecoder::new(file)))
}

/// Resolves an archive member against `destination` without touching the
/// filesystem. Fails if the member is absolute or climbs above the
/// destination with `..`.
pub fn resolve_member(destination: &Path, member: &Path) -> std::result::Result<PathBuf, SecurityError> {
    let escape = || SecurityError::PathTraversal {
        member: member.to_path_buf(),
        destination: destination.to_path_buf(),
    };

    let mut resolved = PathBuf::new();
    for component in member.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return Err(escape());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(escape()),
        }
    }

    Ok(destination.join(resolved))
}

/// Checks where a link member points. Hard links are relative to the archive
/// root, symlinks to the directory holding the link.
fn check_link(
    destination: &Path,
    member: &Path,
    target: &Path,
    hard: bool,
) -> std::result::Result<(), SecurityError> {
    let base = if hard {
        PathBuf::new()
    } else {
        member.parent().map(Path::to_path_buf).unwrap_or_default()
    };

    resolve_member(destination, &base.join(target))
        .map(|_| ())
        .map_err(|_| SecurityError::LinkTraversal {
            member: member.to_path_buf(),
            target: target.to_path_buf(),
        })
}

/// Verifies every member of the archive would stay inside `destination`.
pub fn check_archive(archive_path: &Path, destination: &Path) -> Result<u64> {
    let mut archive = open_archive(archive_path)?;
    let read_err = |source| ArchiveError::Read {
        path: archive_path.to_path_buf(),
        source,
    };

    let mut members = 0u64;
    for entry in archive.entries().map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let member = entry.path().map_err(read_err)?.into_owned();
        resolve_member(destination, &member)?;

        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            if let Some(target) = entry.link_name().map_err(read_err)? {
                check_link(destination, &member, &target, kind.is_hard_link())?;
            }
        }
        members += 1;
    }

    Ok(members)
}

/// Extracts `archive_path` into `destination`, creating it if needed.
///
/// The archive is scanned in full first; if any member fails the traversal
/// check nothing is written.
pub fn extract_archive(archive_path: &Path, destination: &Path, verbose: bool) -> Result<ArchiveStats> {
    let members = check_archive(archive_path, destination)?;

    fs::create_dir_all(destination)?;

    let mut archive = open_archive(archive_path)?;
    archive.set_overwrite(true);
    archive.set_preserve_mtime(true);

    let read_err = |source| ArchiveError::Read {
        path: archive_path.to_path_buf(),
        source,
    };

    let pb = create_progress_bar(members, "Extracting", archive_path);
    let mut stats = ArchiveStats::default();

    for entry in archive.entries().map_err(read_err)? {
        let mut entry = entry.map_err(read_err)?;
        let member = entry.path().map_err(read_err)?.into_owned();
        pb.set_message(member.display().to_string());

        if !entry.unpack_in(destination)? {
            return Err(SecurityError::PathTraversal {
                member,
                destination: destination.to_path_buf(),
            }
            .into());
        }

        let kind = entry.header().entry_type();
        if kind.is_file() {
            stats.files += 1;
            stats.bytes += entry.size();
        } else if kind.is_symlink() {
            stats.links += 1;
        }

        if verbose {
            pb.println(format!(
                "  {} {}",
                colored::Colorize::green("  ✓"),
                member.display()
            ));
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(stats)
}

/// One bar per archive, labelled with what is being done to which file.
fn create_progress_bar(total: u64, verb: &str, archive_path: &Path) -> ProgressBar {
    let name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner:.green} {prefix:.bold} {bar:24.cyan/dim} {pos}/{len} {wide_msg:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.set_prefix(format!("{verb} {name}"));
    pb
}
