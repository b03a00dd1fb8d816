//! Several paths, or a directory, go up as one zip archive.
use std::fs::File;
use std::io::{
    self,
    Seek,
    Write,
};
use std::path::{
    Path,
    PathBuf,
};

use log::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{
    CompressionMethod,
    ZipWriter,
};

use crate::error::{
    Error,
    Result,
};

fn zip_err(e: zip::result::ZipError) -> Error {
    Error::Storage(io::Error::new(io::ErrorKind::Other, e))
}

fn entry_name(p: &Path) -> String {
    p.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<String>>()
        .join("/")
}

/// Name of the archive uploaded for `paths`.
pub fn archive_name(tag: Option<&str>, paths: &[PathBuf]) -> String {
    let stem = match tag {
        Some(v) => v.to_string(),
        None => {
            match paths.first().and_then(|p| p.file_name()) {
                Some(v) => v.to_string_lossy().into_owned(),
                None => String::from("bundle"),
            }
        },
    };
    format!("{}.zip", stem)
}

/// Write every file below `paths` into a zip archive on `w`.
///
/// Each path lands in the archive under its own file name; directories keep
/// their inner layout.
pub fn bundle<W: Write + Seek>(paths: &[PathBuf], w: W) -> Result<W> {
    let mut zip = ZipWriter::new(w);
    let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for p in paths {
        let parent = p.parent().unwrap_or_else(|| Path::new(""));
        for entry in WalkDir::new(p).follow_links(true).sort_by_file_name() {
            let entry = match entry {
                Ok(v) => v,
                Err(e) => {
                    return Err(Error::Storage(io::Error::new(io::ErrorKind::Other, e)));
                },
            };
            let rel = entry.path().strip_prefix(parent).unwrap_or_else(|_| entry.path());
            let name = entry_name(rel);
            if entry.file_type().is_dir() {
                debug!("bundle dir {}", name);
                zip.add_directory(format!("{}/", name), opts).map_err(zip_err)?;
            } else {
                debug!("bundle file {}", name);
                zip.start_file(name, opts).map_err(zip_err)?;
                let mut f = File::open(entry.path())?;
                io::copy(&mut f, &mut zip)?;
            }
        }
    }
    zip.finish().map_err(zip_err)
}

#[cfg(test)]
mod tests {
    use super::{
        archive_name,
        bundle,
    };
    use std::fs::{
        create_dir,
        write,
    };
    use std::io::Cursor;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn test_archive_name() {
        let paths = vec![PathBuf::from("/tmp/photos"), PathBuf::from("b.txt")];
        assert_eq!(archive_name(None, &paths), "photos.zip");
        assert_eq!(archive_name(Some("holiday"), &paths), "holiday.zip");
    }

    #[test]
    fn test_bundle_layout() {
        let d = tempdir().unwrap();
        let dir = d.path().join("docs");
        create_dir(&dir).unwrap();
        write(dir.join("a.txt"), b"aaa").unwrap();
        write(d.path().join("b.txt"), b"bb").unwrap();

        let paths = vec![dir, d.path().join("b.txt")];
        let out = bundle(&paths, Cursor::new(Vec::new())).unwrap();

        let archive = zip::ZipArchive::new(Cursor::new(out.into_inner())).unwrap();
        let mut names: Vec<String> = archive.file_names().map(|s| s.to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["b.txt", "docs/", "docs/a.txt"]);
    }
}
