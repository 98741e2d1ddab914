//! Source archives for profile distribution
//!
//! kcachegrind resolves source files relative to the profile it opened, so
//! bundling the sources next to the profile makes a run inspectable on a
//! machine that does not have the profiled tree. Two shapes are produced:
//! a companion archive holding sources only (`--zipfile`), and the
//! `callgrindzip` format where one archive holds the profile plus every
//! referenced source file.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::aggregate::GlobalProfile;
use crate::callgrind::relative_path;
use crate::source::SourceCache;

/// Name of the profile member inside a `callgrindzip` archive.
pub const PROFILE_MEMBER: &str = "cachegrind.out.lineprof";

fn options() -> FileOptions {
    FileOptions::default().compression_method(CompressionMethod::Deflated)
}

fn member_name(path: &str, relative: bool) -> String {
    if relative {
        relative_path(path)
    } else {
        path.replace('\\', "/")
    }
}

/// Write every referenced source file into a zip at `path`.
pub fn write_source_archive(
    path: &Path,
    profile: &GlobalProfile,
    sources: &mut SourceCache,
    relative: bool,
) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create archive {}", path.display()))?;
    let mut zip = ZipWriter::new(file);
    append_sources(&mut zip, profile, sources, relative)?;
    zip.finish().context("failed to finalize archive")?;
    Ok(())
}

/// Write the rendered profile plus every referenced source file into a
/// single zip at `path`.
pub fn write_profile_archive(
    path: &Path,
    profile_text: &str,
    profile: &GlobalProfile,
    sources: &mut SourceCache,
) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create archive {}", path.display()))?;
    let mut zip = ZipWriter::new(file);
    zip.start_file(PROFILE_MEMBER, options())
        .context("failed to add profile to archive")?;
    zip.write_all(profile_text.as_bytes())
        .context("failed to write profile into archive")?;
    // Members must be relative so the profile's fl= records resolve.
    append_sources(&mut zip, profile, sources, true)?;
    zip.finish().context("failed to finalize archive")?;
    Ok(())
}

fn append_sources(
    zip: &mut ZipWriter<File>,
    profile: &GlobalProfile,
    sources: &mut SourceCache,
    relative: bool,
) -> Result<()> {
    for file in profile.files() {
        let text = sources.text(&file);
        if text.is_empty() {
            // Unreadable source still profiles; it just cannot ship.
            continue;
        }
        let name = member_name(&file, relative);
        zip.start_file(name.clone(), options())
            .with_context(|| format!("failed to add {} to archive", name))?;
        zip.write_all(text.as_bytes())
            .with_context(|| format!("failed to write {} into archive", name))?;
    }
    Ok(())
}
