use std::path::Path;

use terra_common::{Bin, Manifest};
use terra_semver::Version;

use crate::error::{IoContext, WardenError};

/// Extracts a package's tarball bytes into its destination directory,
/// clearing whatever was there first.
pub(crate) fn write_node(dir: &Path, data: &[u8]) -> Result<(), WardenError> {
    if let Some(parent) = dir.parent() {
        std::fs::create_dir_all(parent)
            .io_context(|| format!("Failed to create parent directory {}", parent.display()))?;
    }
    remove_node(dir)?;
    xylem::extract_tarball(data, dir)?;
    Ok(())
}

/// Recursively deletes a package directory. Symlinks are unlinked, never
/// followed into.
pub(crate) fn remove_node(dir: &Path) -> Result<(), WardenError> {
    match std::fs::symlink_metadata(dir) {
        Err(_) => Ok(()),
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(dir)
            .io_context(|| format!("Failed to remove directory {}", dir.display())),
        Ok(_) => std::fs::remove_file(dir)
            .io_context(|| format!("Failed to remove {}", dir.display())),
    }
}

/// Whether a package directory exists and contains a manifest.
pub(crate) fn node_exists(dir: &Path) -> bool {
    dir.join("package.json").is_file()
}

/// The version actually installed in a package directory, if readable.
pub(crate) fn installed_version(dir: &Path) -> Option<Version> {
    let raw = std::fs::read_to_string(dir.join("package.json")).ok()?;
    let manifest: Manifest = serde_json::from_str(&raw).ok()?;
    manifest.version
}

/// Creates the executable shims for one package under the root's shared
/// bin directory (`<root>/node_modules/.bin`), replacing any existing
/// entries of the same names. Returns how many links were made.
pub(crate) fn create_bin_links(
    root: &Path,
    package_dir: &Path,
    bin: &Bin,
    package_name: &str,
) -> Result<usize, WardenError> {
    let bin_dir = root.join("node_modules").join(".bin");
    let mut linked = 0;
    for (bin_name, rel_path) in bin.entries(package_name) {
        let target = package_dir.join(&rel_path);
        // Only link bins that actually shipped in the tarball.
        if std::fs::symlink_metadata(&target).is_err() {
            continue;
        }
        std::fs::create_dir_all(&bin_dir)
            .io_context(|| format!("Failed to create bin dir {}", bin_dir.display()))?;
        let link = bin_dir.join(&bin_name);
        remove_node(&link)?;
        let relative = pathdiff::diff_paths(&target, &bin_dir).unwrap_or_else(|| target.clone());
        symlink_file(&relative, &link).io_context(|| {
            format!(
                "Failed to link bin {} -> {}",
                link.display(),
                relative.display()
            )
        })?;
        make_executable(&target)?;
        linked += 1;
    }
    Ok(linked)
}

/// Removes a package's shims from the shared bin directory.
pub(crate) fn remove_bin_links(
    root: &Path,
    bin: &Bin,
    package_name: &str,
) -> Result<(), WardenError> {
    let bin_dir = root.join("node_modules").join(".bin");
    for (bin_name, _) in bin.entries(package_name) {
        remove_node(&bin_dir.join(&bin_name))?;
    }
    Ok(())
}

#[cfg(unix)]
fn symlink_file(original: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
fn symlink_file(original: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(original, link)
}

#[cfg(unix)]
fn make_executable(target: &Path) -> Result<(), WardenError> {
    use std::os::unix::fs::PermissionsExt;
    let meta = std::fs::metadata(target)
        .io_context(|| format!("Failed to stat bin target {}", target.display()))?;
    let mut perms = meta.permissions();
    perms.set_mode(perms.mode() | 0o111);
    std::fs::set_permissions(target, perms)
        .io_context(|| format!("Failed to chmod bin target {}", target.display()))
}

#[cfg(not(unix))]
fn make_executable(_target: &Path) -> Result<(), WardenError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_existence_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("a");
        assert!(!node_exists(&pkg));
        std::fs::create_dir_all(&pkg).unwrap();
        assert!(!node_exists(&pkg));
        std::fs::write(
            pkg.join("package.json"),
            r#"{"name":"a","version":"1.2.3"}"#,
        )
        .unwrap();
        assert!(node_exists(&pkg));
        assert_eq!(installed_version(&pkg), Some("1.2.3".parse().unwrap()));
    }

    #[cfg(unix)]
    #[test]
    fn bin_links_are_relative_and_executable() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let pkg_dir = root.path().join("node_modules").join("tool");
        std::fs::create_dir_all(&pkg_dir).unwrap();
        std::fs::write(pkg_dir.join("cli.js"), "#!/usr/bin/env node\n").unwrap();

        let bin = Bin::Str("./cli.js".into());
        let linked = create_bin_links(root.path(), &pkg_dir, &bin, "tool").unwrap();
        assert_eq!(linked, 1);

        let link = root.path().join("node_modules/.bin/tool");
        let target = std::fs::read_link(&link).unwrap();
        assert!(target.is_relative());
        let mode = std::fs::metadata(pkg_dir.join("cli.js"))
            .unwrap()
            .permissions()
            .mode();
        assert_ne!(mode & 0o111, 0);

        // Relinking replaces the existing shim.
        let again = create_bin_links(root.path(), &pkg_dir, &bin, "tool").unwrap();
        assert_eq!(again, 1);
    }
}
