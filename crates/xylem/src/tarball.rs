use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;

use crate::error::{Result, XylemError};

/// Extracts a gzipped package tarball under `dir`, stripping the
/// conventional single top-level directory (`package/` for registry
/// tarballs, but any single root is accepted).
///
/// Runs on a blocking thread; registry tarballs are held in memory anyway
/// for integrity checking.
pub async fn extract_to_dir(data: Vec<u8>, dir: PathBuf) -> Result<()> {
    async_std::task::spawn_blocking(move || extract_tarball(&data, &dir)).await
}

/// Synchronous tarball extraction. See [`extract_to_dir`].
pub fn extract_tarball(data: &[u8], dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| {
        XylemError::ExtractIoError(
            e,
            Some(dir.to_path_buf()),
            "creating destination directory for extraction".into(),
        )
    })?;
    let gz = GzDecoder::new(data);
    let mut archive = tar::Archive::new(gz);
    for entry in archive.entries().map_err(|e| {
        XylemError::ExtractIoError(e, None, "getting archive entries".into())
    })? {
        let mut entry = entry.map_err(|e| {
            XylemError::ExtractIoError(e, None, "reading entry from archive".into())
        })?;
        let raw_path = entry
            .path()
            .map_err(|e| XylemError::ExtractIoError(e, None, "reading entry path".into()))?
            .into_owned();
        if raw_path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(XylemError::MaliciousTarball(
                raw_path.to_string_lossy().into_owned(),
            ));
        }
        let Some(stripped) = strip_root(&raw_path) else {
            // The top-level directory itself.
            continue;
        };
        let target = dir.join(&stripped);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                XylemError::ExtractIoError(
                    e,
                    Some(parent.to_path_buf()),
                    "creating parent directory for tarball entry".into(),
                )
            })?;
        }
        entry.set_preserve_mtime(false);
        entry.unpack(&target).map_err(|e| {
            XylemError::ExtractIoError(
                e,
                Some(target.clone()),
                format!("unpacking tarball entry to {}", target.display()),
            )
        })?;
    }
    Ok(())
}

/// Drops the single top-level directory from an archive path, rejecting
/// anything that would escape the destination.
fn strip_root(path: &Path) -> Option<PathBuf> {
    let mut components = path.components();
    components.next()?;
    let mut out = PathBuf::new();
    for component in components {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Reads a single file out of a tarball without writing anything to disk.
/// Used for peeking at manifests.
pub fn read_entry(data: &[u8], entry_path: &str) -> Result<Option<Vec<u8>>> {
    let gz = GzDecoder::new(data);
    let mut archive = tar::Archive::new(gz);
    for entry in archive.entries().map_err(|e| {
        XylemError::ExtractIoError(e, None, "getting archive entries".into())
    })? {
        let mut entry = entry.map_err(|e| {
            XylemError::ExtractIoError(e, None, "reading entry from archive".into())
        })?;
        let raw_path = entry
            .path()
            .map_err(|e| XylemError::ExtractIoError(e, None, "reading entry path".into()))?
            .into_owned();
        if strip_root(&raw_path).as_deref() == Some(Path::new(entry_path)) {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf).map_err(|e| {
                XylemError::ExtractIoError(e, None, "reading entry contents".into())
            })?;
            return Ok(Some(buf));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    /// Builds a gzipped tarball with the conventional `package/` root.
    fn fixture_tarball(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(
                    &mut header,
                    format!("package/{path}"),
                    contents.as_bytes(),
                )
                .unwrap();
        }
        let tarball = builder.into_inner().unwrap();
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&tarball).unwrap();
        gz.finish().unwrap()
    }

    #[test]
    fn extracts_and_strips_top_level_dir() {
        let data = fixture_tarball(&[
            ("package.json", r#"{"name":"a","version":"1.0.0"}"#),
            ("lib/index.js", "module.exports = 42;"),
        ]);
        let dir = tempfile::tempdir().unwrap();
        extract_tarball(&data, dir.path()).unwrap();
        let manifest = std::fs::read_to_string(dir.path().join("package.json")).unwrap();
        assert!(manifest.contains("\"a\""));
        let lib = std::fs::read_to_string(dir.path().join("lib/index.js")).unwrap();
        assert_eq!(lib, "module.exports = 42;");
    }

    #[test]
    fn reads_single_entry() {
        let data = fixture_tarball(&[("package.json", r#"{"name":"b"}"#)]);
        let manifest = read_entry(&data, "package.json").unwrap().unwrap();
        assert_eq!(manifest, br#"{"name":"b"}"#);
        assert!(read_entry(&data, "missing.txt").unwrap().is_none());
    }

    #[test]
    fn path_escapes_are_rejected() {
        assert_eq!(strip_root(Path::new("package/../../etc/passwd")), None);
        assert_eq!(strip_root(Path::new("package")), None);
        assert_eq!(
            strip_root(Path::new("package/lib/a.js")),
            Some(PathBuf::from("lib/a.js"))
        );

        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(4);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "package/../escape.txt", &b"oops"[..])
            .unwrap();
        let tarball = builder.into_inner().unwrap();
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&tarball).unwrap();
        let data = gz.finish().unwrap();

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            extract_tarball(&data, dir.path()),
            Err(XylemError::MaliciousTarball(_))
        ));
    }
}
