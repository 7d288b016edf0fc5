//! Packaging of image mosaic archives.
//!
//! An archive holds the two mosaic descriptor files (`indexer.properties` and
//! `timeregex.properties`) next to the raster tiles, flattened into `mosaic.zip`.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::cli::CommandLineArgs;
use crate::error::MosaicistError;

/// Name of the archive written by [stage].
pub const ARCHIVE_NAME: &str = "mosaic.zip";

/// Number of descriptor files an archive must hold.
pub const DESCRIPTOR_COUNT: usize = 2;

/// Filesystem roots used by the mosaic pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct MosaicLayout {
    /// One subdirectory of raw tiles per store
    pub layers_root: PathBuf,
    /// Mosaic descriptor files
    pub properties_root: PathBuf,
    /// Per-invocation staging directories
    pub staging_root: PathBuf,
}

impl MosaicLayout {
    pub fn new(args: &CommandLineArgs) -> Self {
        MosaicLayout {
            layers_root: args.layers_root.clone(),
            properties_root: args.properties_root.clone(),
            staging_root: args.staging_root.clone(),
        }
    }

    /// Create the layers and staging roots if they do not exist.
    pub fn create_dirs(&self) -> Result<(), MosaicistError> {
        fs::create_dir_all(&self.layers_root)?;
        fs::create_dir_all(&self.staging_root)?;
        Ok(())
    }

    /// Names of the store directories under the layers root, sorted.
    pub fn stores(&self) -> Result<Vec<String>, MosaicistError> {
        let mut stores = vec![];
        for entry in fs::read_dir(&self.layers_root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    stores.push(name.to_string());
                }
            }
        }
        stores.sort();
        Ok(stores)
    }
}

/// A unique staging directory, removed with its contents when dropped.
///
/// Layout: `<staging_root>/<uuid>/{tiles,work,zip}`.
#[derive(Debug)]
pub struct StagingDir {
    root: PathBuf,
}

impl StagingDir {
    /// Create a new staging directory under `staging_root`.
    pub fn create(staging_root: &Path) -> Result<Self, MosaicistError> {
        let root = staging_root.join(Uuid::new_v4().to_string());
        let staging = StagingDir { root };
        fs::create_dir_all(staging.tiles())?;
        fs::create_dir_all(staging.zip())?;
        Ok(staging)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory receiving uploaded tiles.
    pub fn tiles(&self) -> PathBuf {
        self.root.join("tiles")
    }

    /// Directory assembling the archive contents.
    pub fn work(&self) -> PathBuf {
        self.root.join("work")
    }

    /// Directory holding the archive.
    pub fn zip(&self) -> PathBuf {
        self.root.join("zip")
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_dir_all(&self.root) {
            if error.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.root.display(), %error, "failed to remove staging directory");
            }
        }
    }
}

/// A staged archive ready for publishing.
#[derive(Clone, Debug, PartialEq)]
pub struct StagingArchive {
    /// Path of the zip archive
    pub path: PathBuf,
    /// Archive entry names, sorted
    pub entries: Vec<String>,
}

/// Regular files directly under `dir`, sorted by name.
fn regular_files(dir: &Path) -> Result<Vec<PathBuf>, MosaicistError> {
    let mut files = vec![];
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn descriptor_files(props_dir: &Path) -> Result<Vec<PathBuf>, MosaicistError> {
    Ok(regular_files(props_dir)?
        .into_iter()
        .filter(|path| path.extension().map_or(false, |ext| ext == "properties"))
        .collect())
}

fn require_dir(dir: &Path, what: &str) -> Result<(), MosaicistError> {
    if !dir.is_dir() {
        return Err(MosaicistError::validation(format!(
            "{} directory {} does not exist",
            what,
            dir.display()
        )));
    }
    Ok(())
}

/// Stage an archive from a tile directory and a descriptor directory.
///
/// Inputs are validated before anything is written. The staging work directory is then
/// recreated, filled with the descriptors and every regular file directly under `tile_dir`, and
/// zipped into [ARCHIVE_NAME].
///
/// # Arguments
///
/// * `tile_dir`: Directory of raster tiles
/// * `props_dir`: Directory holding exactly two `*.properties` files
/// * `staging`: Staging directory of this invocation
pub fn stage(
    tile_dir: &Path,
    props_dir: &Path,
    staging: &StagingDir,
) -> Result<StagingArchive, MosaicistError> {
    require_dir(tile_dir, "tile")?;
    require_dir(props_dir, "properties")?;
    let descriptors = descriptor_files(props_dir)?;
    if descriptors.len() != DESCRIPTOR_COUNT {
        return Err(MosaicistError::validation(format!(
            "expected exactly {} property files in {}, found {}",
            DESCRIPTOR_COUNT,
            props_dir.display(),
            descriptors.len()
        )));
    }
    let tiles = regular_files(tile_dir)?;

    let work = staging.work();
    if work.exists() {
        fs::remove_dir_all(&work)?;
    }
    fs::create_dir_all(&work)?;
    for source in descriptors.iter().chain(tiles.iter()) {
        if let Some(name) = source.file_name() {
            fs::copy(source, work.join(name))?;
        }
    }

    fs::create_dir_all(staging.zip())?;
    let path = staging.zip().join(ARCHIVE_NAME);
    let entries = write_archive(&work, &path)?;
    tracing::debug!(path = %path.display(), entries = entries.len(), "staged mosaic archive");
    Ok(StagingArchive { path, entries })
}

/// Zip the regular files of `dir`, flattened, into `path`.
fn write_archive(dir: &Path, path: &Path) -> Result<Vec<String>, MosaicistError> {
    let mut writer = ZipWriter::new(File::create(path)?);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut entries = vec![];
    for file in regular_files(dir)? {
        let name = match file.file_name().and_then(|name| name.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        writer.start_file(name.as_str(), options)?;
        writer.write_all(&fs::read(&file)?)?;
        entries.push(name);
    }
    writer.finish()?;
    Ok(entries)
}
