//! Image packing from ZIP archives with manifest support.
//!
//! An archive is a ZIP file holding the files to master and an optional
//! `rofs.json` manifest. Without a manifest every file is placed at its
//! ZIP path. A manifest can set the volume identity and rename or hide
//! individual files; files it does not list keep their ZIP path.

use std::collections::BTreeMap;
use std::io::{Read, Seek};
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};
use zip::ZipArchive;

use crate::error::{PackError, PackResult};
use crate::image::ImageBuilder;

/// File name of the manifest inside an archive.
pub const MANIFEST_NAME: &str = "rofs.json";

/// File entry in an image manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Path inside the ZIP.
    pub src: String,
    /// Path inside the image; defaults to `src`.
    #[serde(default)]
    pub dst: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

/// Image manifest schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    #[serde(default)]
    pub volume_id: Option<String>,
    /// Name written into directory record headers.
    #[serde(default)]
    pub volume_name: Option<String>,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub files: Vec<FileEntry>,
    /// Free-form data carried along, ignored by the packer.
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

/// Contents of an archive, ready to be laid out.
#[derive(Debug, Clone)]
pub struct LoadedArchive {
    pub manifest: Option<ImageManifest>,
    /// File data keyed by ZIP path.
    pub files: BTreeMap<String, Vec<u8>>,
    /// Explicit directory entries (possibly empty directories).
    pub dirs: Vec<String>,
}

impl LoadedArchive {
    /// Build an image. `fallback_id` is used when the manifest sets no
    /// volume identifier.
    pub fn build_image(&self, fallback_id: &str) -> PackResult<Vec<u8>> {
        self.to_builder(fallback_id)?.build()
    }

    /// Stage the archive contents in an [`ImageBuilder`].
    pub fn to_builder(&self, fallback_id: &str) -> PackResult<ImageBuilder> {
        let manifest = self.manifest.clone().unwrap_or_default();
        let volume_id = manifest.volume_id.as_deref().unwrap_or(fallback_id);
        let mut builder = ImageBuilder::new(volume_id);
        builder.case_sensitive(manifest.case_sensitive);
        if let Some(name) = &manifest.volume_name {
            builder.volume_name(name)?;
        }

        for dir in &self.dirs {
            builder.add_dir(dir)?;
        }

        let mut listed = BTreeMap::new();
        for entry in &manifest.files {
            if !self.files.contains_key(&entry.src) {
                return Err(PackError::MissingFile(entry.src.clone()));
            }
            listed.insert(entry.src.as_str(), entry);
        }

        for (path, data) in &self.files {
            let Some(entry) = listed.get(path.as_str()) else {
                builder.add_file(path, data.clone())?;
                continue;
            };
            let dst = entry.dst.as_deref().unwrap_or(path);
            builder.add_file(dst, data.clone())?;
            if entry.hidden {
                builder.set_hidden(dst, true)?;
            }
        }
        Ok(builder)
    }
}

/// Load an archive from ZIP data.
pub fn load_archive<R: Read + Seek>(reader: R) -> PackResult<LoadedArchive> {
    let mut archive = ZipArchive::new(reader)?;
    let mut files = BTreeMap::new();
    let mut dirs = Vec::new();
    let mut manifest = None;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let name = file.name().trim_end_matches('/').to_string();
        if file.is_dir() {
            dirs.push(name);
            continue;
        }

        let mut content = Vec::new();
        file.read_to_end(&mut content)?;

        if name.eq_ignore_ascii_case(MANIFEST_NAME) {
            manifest = Some(serde_json::from_slice::<ImageManifest>(&content)?);
        } else {
            files.insert(name, content);
        }
    }

    debug!(
        "archive: {} files, {} dirs, manifest {}",
        files.len(),
        dirs.len(),
        if manifest.is_some() { "present" } else { "absent" }
    );
    Ok(LoadedArchive {
        manifest,
        files,
        dirs,
    })
}

/// Load an archive from a file path.
pub fn load_archive_from_path(path: &Path) -> PackResult<LoadedArchive> {
    let file = std::fs::File::open(path)?;
    load_archive(std::io::BufReader::new(file))
}

/// Pack a ZIP file into an image. The volume identifier defaults to the
/// upper-cased file stem.
pub fn pack_archive_from_path(path: &Path) -> PackResult<Vec<u8>> {
    let archive = load_archive_from_path(path)?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_ascii_uppercase())
        .unwrap_or_default();
    let fallback: String = stem.chars().filter(char::is_ascii).take(32).collect();
    archive.build_image(&fallback)
}
