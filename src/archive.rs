use crate::error::{AppError, Result};
use crate::parser::station_id_from_path;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use zip::ZipArchive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractLayout {
    /// Every member lands directly in the destination directory.
    #[default]
    Flat,
    /// Members land in `<dest>/<station_id>/`.
    PerStation,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractSummary {
    pub extracted: Vec<String>,
    pub failed: Vec<String>,
}

pub struct Extractor {
    layout: ExtractLayout,
}

impl Extractor {
    pub fn new(layout: ExtractLayout) -> Self {
        Self { layout }
    }

    /// Extract every `.zip` in `source_dir` into `dest_dir`.
    ///
    /// A failing archive is logged and skipped. Only listing the source or
    /// creating the destination can fail the whole call.
    pub fn extract_all(&self, source_dir: &Path, dest_dir: &Path) -> Result<ExtractSummary> {
        std::fs::create_dir_all(dest_dir)?;

        let archives = list_zip_files(source_dir)?;
        info!(
            "Extracting {} archives from {} to {}",
            archives.len(),
            source_dir.display(),
            dest_dir.display()
        );

        let mut summary = ExtractSummary::default();

        for archive_path in archives {
            let name = archive_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            match self.extract_one(&archive_path, dest_dir) {
                Ok(target) => {
                    info!("Successfully extracted {} to {}", name, target.display());
                    summary.extracted.push(name);
                }
                Err(e) => {
                    error!("Error extracting {}: {}", name, e);
                    summary.failed.push(name);
                }
            }
        }

        if !summary.failed.is_empty() {
            warn!(
                "Extraction finished with {} failures out of {} archives",
                summary.failed.len(),
                summary.failed.len() + summary.extracted.len()
            );
        }

        Ok(summary)
    }

    /// Extract a single archive, returning the directory it was written to.
    pub fn extract_one(&self, archive_path: &Path, dest_dir: &Path) -> Result<PathBuf> {
        let target = match self.layout {
            ExtractLayout::Flat => dest_dir.to_path_buf(),
            ExtractLayout::PerStation => dest_dir.join(station_id_from_path(archive_path)?),
        };

        let file = File::open(archive_path)?;
        let mut archive = ZipArchive::new(BufReader::new(file))?;

        std::fs::create_dir_all(&target)?;
        archive.extract(&target).map_err(|e| {
            AppError::Extraction(format!("{}: {}", archive_path.display(), e))
        })?;

        Ok(target)
    }
}

/// Files ending in `.zip`, sorted by name.
fn list_zip_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_zip = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("zip"))
            .unwrap_or(false);
        if path.is_file() && is_zip {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}
