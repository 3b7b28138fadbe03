use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Could not open {1}")]
    Open(#[source] io::Error, PathBuf),

    #[error("Could not unpack {1}")]
    Unpack(#[source] zip::result::ZipError, PathBuf),
}

/// Extracts the zip `archive` into `dest_dir`, returning the top-level
/// entries written.
pub fn unzip(archive: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let file = File::open(archive).map_err(|e| ArchiveError::Open(e, archive.to_path_buf()))?;
    let mut zip =
        zip::ZipArchive::new(file).map_err(|e| ArchiveError::Unpack(e, archive.to_path_buf()))?;

    let mut entries: Vec<PathBuf> = zip
        .file_names()
        .filter_map(|name| Path::new(name).components().next())
        .map(|first| dest_dir.join(first))
        .collect();
    entries.sort();
    entries.dedup();

    fs::create_dir_all(dest_dir).map_err(|e| ArchiveError::Open(e, dest_dir.to_path_buf()))?;
    zip.extract(dest_dir)
        .map_err(|e| ArchiveError::Unpack(e, archive.to_path_buf()))?;
    log::debug!("Unpacked {:?} into {:?}", archive, dest_dir);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn unzip_lists_top_level_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        {
            let file = File::create(&archive).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            let opts = zip::write::FileOptions::default();
            zip.start_file("bundle/a.txt", opts).unwrap();
            zip.write_all(b"a").unwrap();
            zip.start_file("bundle/b.txt", opts).unwrap();
            zip.write_all(b"b").unwrap();
            zip.start_file("readme.md", opts).unwrap();
            zip.write_all(b"r").unwrap();
            zip.finish().unwrap();
        }

        let out = dir.path().join("out");
        let entries = unzip(&archive, &out).unwrap();
        assert_eq!(entries, vec![out.join("bundle"), out.join("readme.md")]);
        assert_eq!(fs::read_to_string(out.join("bundle/b.txt")).unwrap(), "b");
    }

    #[test]
    fn not_a_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        fs::write(&archive, b"not a zip").unwrap();
        assert!(matches!(
            unzip(&archive, dir.path()),
            Err(ArchiveError::Unpack(..))
        ));
    }
}
