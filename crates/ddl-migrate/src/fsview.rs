//! Read-only filesystem views over migration and load inputs.
//!
//! - [`DirFs`]: a directory on disk
//! - [`MemFs`]: an in-memory file map, filled by automigrate and by the
//!   archive readers ([`unpack_zip`], [`unpack_tgz`])
//!
//! Names are relative and `/`-separated on every platform.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;

use crate::error::{MigrateError, Result};

/// Read access to a tree of files.
pub trait FileView: Send + Sync {
    /// Entire content of `name`.
    fn read(&self, name: &str) -> Result<Vec<u8>>;

    /// Streaming reader over `name`.
    fn open(&self, name: &str) -> Result<Box<dyn Read + Send + '_>> {
        Ok(Box::new(Cursor::new(self.read(name)?)))
    }

    fn exists(&self, name: &str) -> bool;

    /// Every file below the root, recursively, sorted.
    fn list(&self) -> Result<Vec<String>>;

    /// Content of `name` as UTF-8 text.
    fn read_to_string(&self, name: &str) -> Result<String> {
        String::from_utf8(self.read(name)?)
            .map_err(|e| MigrateError::load(name, format!("not valid UTF-8: {}", e)))
    }
}

/// A directory on disk.
#[derive(Debug, Clone)]
pub struct DirFs {
    root: PathBuf,
}

impl DirFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        name.split('/')
            .filter(|p| !p.is_empty())
            .fold(self.root.clone(), |acc, p| acc.join(p))
    }

    fn walk(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let rel = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };
            if entry.file_type()?.is_dir() {
                self.walk(&entry.path(), &rel, out)?;
            } else {
                out.push(rel);
            }
        }
        Ok(())
    }
}

impl FileView for DirFs {
    fn read(&self, name: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.path(name))?)
    }

    fn open(&self, name: &str) -> Result<Box<dyn Read + Send + '_>> {
        Ok(Box::new(fs::File::open(self.path(name))?))
    }

    fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        if self.root.is_dir() {
            self.walk(&self.root, "", &mut out)?;
        }
        out.sort();
        Ok(out)
    }
}

/// Files held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemFs {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files.insert(name.into(), content.into());
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FileView for MemFs {
    fn read(&self, name: &str) -> Result<Vec<u8>> {
        self.files.get(name).cloned().ok_or_else(|| {
            MigrateError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{}: no such file", name),
            ))
        })
    }

    fn exists(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.files.keys().cloned().collect())
    }
}

/// Basename of an archive without its extension (`dump.tar.gz` -> `dump`).
pub fn archive_stem(path: &str) -> String {
    let base = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let lower = base.to_ascii_lowercase();
    for ext in [".tar.gz", ".tgz", ".zip"] {
        if lower.ends_with(ext) {
            return base[..base.len() - ext.len()].to_string();
        }
    }
    base.to_string()
}

/// Unpack a zip archive into memory.
pub fn unpack_zip(path: &Path) -> Result<MemFs> {
    let file = fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry.enclosed_name() else {
            return Err(MigrateError::Archive(format!(
                "{}: unsafe entry name {}",
                path.display(),
                entry.name()
            )));
        };
        let name = name.to_string_lossy().replace('\\', "/");
        let mut content = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut content)?;
        entries.push((name, content));
    }
    Ok(collect_entries(&archive_stem(&path.to_string_lossy()), entries))
}

/// Unpack a gzip-compressed tar archive into memory.
pub fn unpack_tgz(path: &Path) -> Result<MemFs> {
    let file = fs::File::open(path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let mut entries = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path()?.to_string_lossy().replace('\\', "/");
        if name.split('/').any(|p| p == "..") {
            return Err(MigrateError::Archive(format!(
                "{}: unsafe entry name {}",
                path.display(),
                name
            )));
        }
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        entries.push((name.trim_start_matches("./").to_string(), content));
    }
    Ok(collect_entries(&archive_stem(&path.to_string_lossy()), entries))
}

/// Drop `__MACOSX/` noise and strip a single wrapping directory named after the archive.
fn collect_entries(stem: &str, entries: Vec<(String, Vec<u8>)>) -> MemFs {
    let entries: Vec<(String, Vec<u8>)> = entries
        .into_iter()
        .filter(|(name, _)| !name.starts_with("__MACOSX/") && !name.ends_with(".DS_Store"))
        .collect();

    let wrapper = format!("{}/", stem);
    let nested = !entries.is_empty() && entries.iter().all(|(name, _)| name.starts_with(&wrapper));

    let mut fs = MemFs::new();
    for (name, content) in entries {
        let name = if nested {
            name[wrapper.len()..].to_string()
        } else {
            name
        };
        debug!("archive entry {} ({} bytes)", name, content.len());
        fs.insert(name, content);
    }
    fs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_dirfs_lists_recursively() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("01_init.sql"), "CREATE TABLE a (x INT);").unwrap();
        fs::create_dir_all(dir.path().join("repeatable/views")).unwrap();
        fs::write(dir.path().join("repeatable/views/v.sql"), "SELECT 1;").unwrap();

        let view = DirFs::new(dir.path());
        assert_eq!(
            view.list().unwrap(),
            vec!["01_init.sql", "repeatable/views/v.sql"]
        );
        assert!(view.exists("repeatable/views/v.sql"));
        assert!(!view.exists("repeatable"));
        assert_eq!(view.read_to_string("01_init.sql").unwrap(), "CREATE TABLE a (x INT);");
    }

    #[test]
    fn test_memfs_read_missing_is_error() {
        let mut m = MemFs::new();
        m.insert("a.sql", "SELECT 1;");
        assert!(m.exists("a.sql"));
        assert!(m.read("b.sql").is_err());
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_archive_stem() {
        assert_eq!(archive_stem("/tmp/sakila.zip"), "sakila");
        assert_eq!(archive_stem("out/dump.tar.gz"), "dump");
        assert_eq!(archive_stem("x.tgz"), "x");
    }

    #[test]
    fn test_unpack_zip_strips_wrapper_and_macosx() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sakila.zip");
        {
            let file = fs::File::create(&path).unwrap();
            let mut zw = zip::ZipWriter::new(file);
            let opts = zip::write::SimpleFileOptions::default();
            zw.start_file("sakila/schema.sql", opts).unwrap();
            zw.write_all(b"CREATE TABLE t (id INT);").unwrap();
            zw.start_file("sakila/t.csv", opts).unwrap();
            zw.write_all(b"id\n1\n").unwrap();
            zw.start_file("__MACOSX/sakila/._t.csv", opts).unwrap();
            zw.write_all(b"junk").unwrap();
            zw.finish().unwrap();
        }
        let m = unpack_zip(&path).unwrap();
        assert_eq!(m.list().unwrap(), vec!["schema.sql", "t.csv"]);
    }

    #[test]
    fn test_unpack_tgz_flat() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.tgz");
        {
            let file = fs::File::create(&path).unwrap();
            let gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut tb = tar::Builder::new(gz);
            let body = b"id\n1\n";
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tb.append_data(&mut header, "t.csv", &body[..]).unwrap();
            tb.into_inner().unwrap().finish().unwrap();
        }
        let m = unpack_tgz(&path).unwrap();
        assert_eq!(m.read_to_string("t.csv").unwrap(), "id\n1\n");
    }
}
