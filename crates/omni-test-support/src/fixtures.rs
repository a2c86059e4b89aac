//! On-disk DCP fixture builder.

use std::path::{Path, PathBuf};

use uuid::Uuid;

/// A temporary DCP directory with the ASSETMAP/CPL/PKL triplet plus MXF
/// filler, torn down with the fixture.
pub struct DcpFixture {
    _tempdir: tempfile::TempDir,
    /// Package root.
    pub root: PathBuf,
    /// ASSETMAP UUID written into the fixture.
    pub assetmap_uuid: Uuid,
    /// CPL UUID written into the fixture.
    pub cpl_uuid: Uuid,
}

impl DcpFixture {
    /// Build a fixture named `package_name` with the given MXF payload
    /// sizes (one picture, one sound file).
    ///
    /// # Panics
    ///
    /// Panics on filesystem failures; fixtures run under test harnesses.
    #[must_use]
    pub fn create(package_name: &str, picture_bytes: usize, sound_bytes: usize) -> Self {
        let tempdir = tempfile::tempdir().expect("fixture tempdir");
        let root = tempdir.path().join(package_name);
        std::fs::create_dir_all(&root).expect("fixture root");

        let assetmap_uuid = Uuid::new_v4();
        let cpl_uuid = Uuid::new_v4();
        let picture_uuid = Uuid::new_v4();
        let sound_uuid = Uuid::new_v4();

        write(
            &root,
            "ASSETMAP.xml",
            format!(
                "<?xml version=\"1.0\"?>\n<AssetMap>\n  <Id>urn:uuid:{assetmap_uuid}</Id>\n  <AssetList>\n    <Asset>\n      <Id>urn:uuid:{picture_uuid}</Id>\n      <ChunkList><Chunk><Path>picture.mxf</Path></Chunk></ChunkList>\n    </Asset>\n    <Asset>\n      <Id>urn:uuid:{sound_uuid}</Id>\n      <ChunkList><Chunk><Path>sound_pcm.mxf</Path></Chunk></ChunkList>\n    </Asset>\n  </AssetList>\n</AssetMap>\n"
            )
            .into_bytes(),
        );
        write(
            &root,
            &format!("CPL_{package_name}.xml"),
            format!(
                "<?xml version=\"1.0\"?>\n<CompositionPlaylist>\n  <Id>urn:uuid:{cpl_uuid}</Id>\n  <ContentTitleText>{package_name}</ContentTitleText>\n  <ContentKind>feature</ContentKind>\n  <EditRate>24 1</EditRate>\n  <ReelList>\n    <Reel><AssetList><Duration>1440</Duration></AssetList></Reel>\n  </ReelList>\n</CompositionPlaylist>\n"
            )
            .into_bytes(),
        );
        write(
            &root,
            &format!("PKL_{package_name}.xml"),
            format!(
                "<?xml version=\"1.0\"?>\n<PackingList>\n  <Id>urn:uuid:{}</Id>\n  <AssetList>\n    <Asset>\n      <Id>urn:uuid:{picture_uuid}</Id>\n      <Hash>fixturehash</Hash>\n    </Asset>\n  </AssetList>\n</PackingList>\n",
                Uuid::new_v4()
            )
            .into_bytes(),
        );
        write(&root, "picture.mxf", patterned(picture_bytes, 7));
        write(&root, "sound_pcm.mxf", patterned(sound_bytes, 13));

        Self {
            _tempdir: tempdir,
            root,
            assetmap_uuid,
            cpl_uuid,
        }
    }

    /// Rewrite the CPL with different whitespace so its bytes diverge
    /// from another fixture while the identifiers stay the same.
    pub fn perturb_xml(&self) {
        let cpl = std::fs::read_dir(&self.root)
            .expect("read fixture")
            .flatten()
            .map(|e| e.path())
            .find(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("CPL_"))
            })
            .expect("fixture CPL");
        let text = std::fs::read_to_string(&cpl).expect("read CPL");
        std::fs::write(&cpl, text.replace('\n', "\r\n")).expect("perturb CPL");
    }
}

fn write(root: &Path, name: &str, bytes: Vec<u8>) {
    std::fs::write(root.join(name), bytes).expect("fixture file");
}

fn patterned(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i as u64 * u64::from(seed)) % 251) as u8)
        .collect()
}
