//! End-to-end identity checks over realistic DCP fixtures: two sites
//! holding the same MXFs converge on one info-hash once the second site
//! adopts the first site's canonical XML bytes.

use std::path::Path;

use omni_test_support::DcpFixture;
use omni_torrent::{BuildOptions, build_package_torrent};
use tokio::sync::watch;

fn copy_tree(from: &Path, to: &Path) {
    std::fs::create_dir_all(to).expect("create copy root");
    for entry in std::fs::read_dir(from).expect("read fixture").flatten() {
        let target = to.join(entry.file_name());
        if entry.file_type().expect("file type").is_dir() {
            copy_tree(&entry.path(), &target);
        } else {
            std::fs::copy(entry.path(), &target).expect("copy file");
        }
    }
}

fn options() -> BuildOptions {
    BuildOptions {
        piece_hash_workers: 2,
        checkpoint_interval_bytes: u64::MAX,
        piece_size: Some(4096),
    }
}

#[tokio::test]
async fn divergent_xml_reconverges_after_canonical_adoption() {
    let (_cancel_tx, cancel) = watch::channel(false);
    let fixture = DcpFixture::create("Demo_FTR_2K", 64 * 1024, 16 * 1024);

    // Second site: identical MXFs under the same package name, then
    // tool-introduced CRLF variance in the CPL.
    let other_site = tempfile::tempdir().expect("site b tempdir");
    let other_root = other_site.path().join("Demo_FTR_2K");
    copy_tree(&fixture.root, &other_root);

    let canonical = build_package_torrent(&fixture.root, &options(), None, &cancel, None)
        .await
        .expect("canonical build");

    let cpl_name = std::fs::read_dir(&other_root)
        .expect("read copy")
        .flatten()
        .map(|e| e.file_name())
        .find(|name| name.to_string_lossy().starts_with("CPL_"))
        .expect("copied CPL");
    let cpl_path = other_root.join(&cpl_name);
    let cpl_text = std::fs::read_to_string(&cpl_path).expect("read CPL");
    std::fs::write(&cpl_path, cpl_text.replace('\n', "\r\n")).expect("perturb CPL");

    let divergent = build_package_torrent(&other_root, &options(), None, &cancel, None)
        .await
        .expect("divergent build");
    assert_ne!(
        divergent.info_hash, canonical.info_hash,
        "byte-variant XML must change the identity"
    );

    // Canonical adoption: overwrite the variant file with the canonical
    // bytes (what the hub's canonical-xml exchange delivers).
    let canonical_bytes = std::fs::read(fixture.root.join(&cpl_name)).expect("canonical CPL");
    std::fs::write(&cpl_path, canonical_bytes).expect("adopt canonical CPL");

    let adopted = build_package_torrent(&other_root, &options(), None, &cancel, None)
        .await
        .expect("adopted build");
    assert_eq!(adopted.info_hash, canonical.info_hash);
    assert_eq!(adopted.torrent_bytes.len(), canonical.torrent_bytes.len());
}

#[tokio::test]
async fn fixture_builds_are_stable_across_runs() {
    let (_cancel_tx, cancel) = watch::channel(false);
    let fixture = DcpFixture::create("Stable_FTR", 32 * 1024, 8 * 1024);

    let first = build_package_torrent(&fixture.root, &options(), None, &cancel, None)
        .await
        .expect("first build");
    let second = build_package_torrent(&fixture.root, &options(), None, &cancel, None)
        .await
        .expect("second build");

    assert_eq!(first.info_hash, second.info_hash);
    assert_eq!(first.torrent_bytes, second.torrent_bytes);
    assert_eq!(first.total_pieces, second.total_pieces);
}
