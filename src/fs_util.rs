use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::ZipArchive;
use zip::ZipWriter;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;

use crate::error::GexError;

/// Copies the database entry `db_name` of a store archive into `target_dir`.
///
/// Other entries are ignored. Returns the path of the unpacked database.
pub fn unpack_store(
    archive_path: &Path,
    db_name: &str,
    target_dir: &Path,
) -> Result<PathBuf, GexError> {
    let file = fs::File::open(archive_path).map_err(|err| {
        GexError::Archive(format!("open store archive {}: {err}", archive_path.display()))
    })?;
    let mut archive = ZipArchive::new(file).map_err(|err| {
        GexError::Archive(format!("{} is not a store archive: {err}", archive_path.display()))
    })?;
    let mut entry = match archive.by_name(db_name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => {
            return Err(GexError::Archive(format!(
                "store archive {} holds no {db_name}",
                archive_path.display()
            )));
        }
        Err(err) => return Err(GexError::Archive(err.to_string())),
    };

    let db_path = target_dir.join(db_name);
    let mut outfile =
        fs::File::create(&db_path).map_err(|err| GexError::Filesystem(err.to_string()))?;
    let bytes = io::copy(&mut entry, &mut outfile)
        .map_err(|err| GexError::Archive(format!("unpack {db_name}: {err}")))?;
    debug!(archive = %archive_path.display(), bytes, "unpacked store database");
    Ok(db_path)
}

/// Packs every file below `source_dir` into a new zip at `zip_path`.
///
/// The archive is written next to its destination and renamed into place.
pub fn pack_dir(source_dir: &Path, zip_path: &Path) -> Result<(), GexError> {
    let parent = zip_path
        .parent()
        .ok_or_else(|| GexError::Filesystem("invalid archive path".to_string()))?;
    fs::create_dir_all(parent).map_err(|err| GexError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix("kira-gex-archive")
        .tempfile_in(parent)
        .map_err(|err| GexError::Filesystem(err.to_string()))?;

    let mut writer = ZipWriter::new(
        temp.reopen()
            .map_err(|err| GexError::Filesystem(err.to_string()))?,
    );
    let mut files = walk_dir(source_dir)?;
    files.retain(|path| path.is_file());
    files.sort();
    for path in files {
        let relative = path
            .strip_prefix(source_dir)
            .map_err(|err| GexError::Archive(err.to_string()))?;
        let name = relative.to_string_lossy().replace('\\', "/");
        writer
            .start_file(name, SimpleFileOptions::default())
            .map_err(|err| GexError::Archive(err.to_string()))?;
        let mut input =
            fs::File::open(&path).map_err(|err| GexError::Filesystem(err.to_string()))?;
        io::copy(&mut input, &mut writer).map_err(|err| GexError::Archive(err.to_string()))?;
    }
    writer
        .finish()
        .map_err(|err| GexError::Archive(err.to_string()))?;

    if zip_path.exists() {
        fs::remove_file(zip_path).map_err(|err| GexError::Filesystem(err.to_string()))?;
    }
    temp.persist(zip_path)
        .map_err(|err| GexError::Filesystem(err.to_string()))?;
    Ok(())
}

fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, GexError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| GexError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| GexError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    Ok(items)
}
