//! DCP directory detection.
//!
//! A directory is a DCP when it contains an `ASSETMAP` file (bare or
//! `.xml`), at least one `CPL_*.xml` and at least one `PKL_*.xml`.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Maximum depth below a library root at which DCP roots are searched.
/// DCPs are themselves shallow; nesting beyond this is distributor noise.
const MAX_SCAN_DEPTH: usize = 4;

/// Whether `dir` holds the ASSETMAP/CPL/PKL triplet that marks a DCP root.
#[must_use]
pub fn is_dcp_dir(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };

    let mut has_assetmap = false;
    let mut has_cpl = false;
    let mut has_pkl = false;

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.to_ascii_uppercase().starts_with("ASSETMAP") {
            has_assetmap = true;
        } else if is_prefixed_xml(name, "CPL_") {
            has_cpl = true;
        } else if is_prefixed_xml(name, "PKL_") {
            has_pkl = true;
        }
        if has_assetmap && has_cpl && has_pkl {
            return true;
        }
    }

    false
}

fn is_prefixed_xml(name: &str, prefix: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    upper.starts_with(prefix) && upper.ends_with(".XML")
}

/// Walk a library root and collect every DCP directory beneath it.
///
/// Descends at most [`MAX_SCAN_DEPTH`] levels and does not recurse into a
/// matched DCP (a package never contains another package).
#[must_use]
pub fn find_dcp_dirs(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut walker = WalkDir::new(root)
        .min_depth(0)
        .max_depth(MAX_SCAN_DEPTH)
        .into_iter();

    while let Some(entry) = walker.next() {
        let Ok(entry) = entry else {
            continue;
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        if is_dcp_dir(entry.path()) {
            found.push(entry.path().to_path_buf());
            walker.skip_current_dir();
        }
    }

    found.sort();
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_dcp(root: &Path, name: &str) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(&dir).expect("create dcp dir");
        fs::write(dir.join("ASSETMAP.xml"), b"<AssetMap/>").expect("assetmap");
        fs::write(dir.join("CPL_feature.xml"), b"<Cpl/>").expect("cpl");
        fs::write(dir.join("PKL_feature.xml"), b"<Pkl/>").expect("pkl");
        dir
    }

    #[test]
    fn detects_complete_triplet() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dcp = make_dcp(tmp.path(), "MOVIE_FTR");
        assert!(is_dcp_dir(&dcp));
    }

    #[test]
    fn rejects_missing_pkl() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = tmp.path().join("incomplete");
        fs::create_dir_all(&dir).expect("dir");
        fs::write(dir.join("ASSETMAP"), b"").expect("assetmap");
        fs::write(dir.join("CPL_x.xml"), b"").expect("cpl");
        assert!(!is_dcp_dir(&dir));
    }

    #[test]
    fn finds_nested_dcps_without_descending_into_them() {
        let tmp = tempfile::tempdir().expect("tempdir");
        make_dcp(tmp.path(), "distributor/MOVIE_A_FTR");
        make_dcp(tmp.path(), "MOVIE_B_TLR");
        // Noise directory without the triplet.
        fs::create_dir_all(tmp.path().join("empty")).expect("dir");

        let found = find_dcp_dirs(tmp.path());
        assert_eq!(found.len(), 2);
        assert!(found.iter().any(|p| p.ends_with("MOVIE_A_FTR")));
        assert!(found.iter().any(|p| p.ends_with("MOVIE_B_TLR")));
    }
}
