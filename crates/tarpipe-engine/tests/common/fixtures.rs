use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;
use tempfile::TempDir;

/// UTF-8 view of a temporary directory
pub fn utf8_dir(dir: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("path should be valid UTF-8")
}

/// Whether a program can be found on PATH
pub fn tool_available(program: &str) -> bool {
    which::which(program).is_ok()
}

/// GNU tar is required for the listed-incremental tests
pub fn gnu_tar_available() -> bool {
    std::process::Command::new("tar")
        .arg("--version")
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).contains("GNU tar"))
        .unwrap_or(false)
}

/// Write `files` (relative path, contents) under `root`
pub fn write_tree(root: &Utf8Path, files: &[(&str, &str)]) {
    for (path, contents) in files {
        let path = root.join(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }
}

/// Every regular file under `root`, keyed by relative path
pub fn read_tree(root: &Utf8Path) -> BTreeMap<String, String> {
    fn walk(root: &Utf8Path, dir: &Utf8Path, out: &mut BTreeMap<String, String>) {
        for entry in dir.read_dir_utf8().unwrap() {
            let entry = entry.unwrap();
            let path = entry.path();
            if path.is_dir() {
                walk(root, path, out);
            } else {
                let rel = path.strip_prefix(root).unwrap().to_string();
                out.insert(rel, std::fs::read_to_string(path).unwrap());
            }
        }
    }

    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

/// Write an executable script standing in for the archiver
#[cfg(unix)]
pub fn fake_archiver(dir: &Utf8Path, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string()
}
