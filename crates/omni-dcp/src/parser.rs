//! Parser capability seam and the built-in scrape parser.
//!
//! Real deployments plug a full SMPTE XML/MXF parser in behind
//! [`DcpParser`]. The bundled [`ScrapeParser`] extracts the identifiers the
//! control plane needs (UUIDs, sizes, titles, per-asset hashes) by scanning
//! the XML text, which is enough to drive discovery and content identity
//! without an XML dependency.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::detect::is_dcp_dir;
use crate::error::{DcpError, DcpResult};
use crate::model::{AssetInfo, CompositionInfo, PackageMetadata};

/// Capability implemented by DCP metadata parsers.
pub trait DcpParser: Send + Sync {
    /// Parse the package rooted at `dir` into metadata.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory is not a DCP or its metadata
    /// files cannot be read.
    fn parse(&self, dir: &Path) -> DcpResult<PackageMetadata>;
}

/// Text-scanning parser covering the control plane's metadata needs.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScrapeParser;

impl DcpParser for ScrapeParser {
    fn parse(&self, dir: &Path) -> DcpResult<PackageMetadata> {
        if !is_dcp_dir(dir) {
            return Err(DcpError::NotADcp {
                path: dir.to_path_buf(),
            });
        }

        let package_name = dir
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("unnamed")
            .to_string();

        let assetmap_path = find_file_with_prefix(dir, "ASSETMAP")?;
        let assetmap_text = read_text(&assetmap_path)?;
        let assetmap_uuid =
            first_uuid(&assetmap_text).ok_or_else(|| DcpError::MissingIdentifier {
                path: assetmap_path.clone(),
                field: "assetmap_uuid",
            })?;

        let asset_paths = assetmap_entries(&assetmap_text);
        let pkl_hashes = pkl_hashes(dir)?;

        let mut compositions = Vec::new();
        let mut assets = Vec::new();
        let mut total_size_bytes = 0_u64;
        let mut file_count = 0_u32;
        let mut content_title = package_name.clone();
        let mut content_kind = kind_from_name(&package_name).to_string();

        for entry in std::fs::read_dir(dir).map_err(|source| DcpError::Io {
            path: dir.to_path_buf(),
            source,
        })? {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or_default();
            total_size_bytes += size;
            file_count += 1;

            let upper = name.to_ascii_uppercase();
            if upper.starts_with("CPL_") && upper.ends_with(".XML") {
                if let Some(composition) = parse_cpl(&path)? {
                    if let Some(title) = composition.1 {
                        content_title = title;
                    }
                    if let Some(kind) = composition.2 {
                        content_kind = kind;
                    }
                    compositions.push(composition.0);
                }
            }

            let relative = PathBuf::from(name);
            if let Some(asset_uuid) = asset_paths.get(name) {
                let hash_value = pkl_hashes.get(asset_uuid).cloned();
                assets.push(AssetInfo {
                    asset_uuid: *asset_uuid,
                    file_path: relative,
                    file_name: name.to_string(),
                    asset_type: asset_type_from_name(name).to_string(),
                    size_bytes: size,
                    hash_algorithm: hash_value.as_ref().map(|_| "SHA-1".to_string()),
                    hash_value,
                });
            }
        }

        assets.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        compositions.sort_by_key(|c| c.cpl_uuid);

        debug!(
            package = %package_name,
            assetmap = %assetmap_uuid,
            files = file_count,
            "parsed DCP metadata"
        );

        Ok(PackageMetadata {
            assetmap_uuid,
            package_name,
            content_title,
            content_kind,
            total_size_bytes,
            file_count,
            compositions,
            assets,
        })
    }
}

type ParsedCpl = (CompositionInfo, Option<String>, Option<String>);

fn parse_cpl(path: &Path) -> DcpResult<Option<ParsedCpl>> {
    let text = read_text(path)?;
    let Some(cpl_uuid) = first_uuid(&text) else {
        // A CPL without an Id cannot be keyed; skip it rather than failing
        // the whole package.
        debug!(path = %path.display(), "CPL carries no urn:uuid identifier");
        return Ok(None);
    };

    let edit_rate = tag_value(&text, "EditRate").unwrap_or_else(|| "24 1".to_string());
    let reel_count = count_tag(&text, "<Reel>").max(1) as u32;
    let duration_frames = tag_values(&text, "Duration")
        .iter()
        .filter_map(|value| value.trim().parse::<u64>().ok())
        .sum();
    let title = tag_value(&text, "ContentTitleText");
    let kind = tag_value(&text, "ContentKind").map(|k| k.trim().to_ascii_lowercase());

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_ascii_uppercase();
    let resolution = if name.contains("4K") { "4K" } else { "2K" };
    let sound_config = if name.contains("71") || name.contains("7.1") {
        "7.1"
    } else {
        "5.1"
    };

    Ok(Some((
        CompositionInfo {
            cpl_uuid,
            edit_rate,
            resolution: resolution.to_string(),
            sound_config: sound_config.to_string(),
            reel_count,
            duration_frames,
        },
        title,
        kind,
    )))
}

/// Map of `file name → asset UUID` scraped from the ASSETMAP chunk list.
fn assetmap_entries(text: &str) -> HashMap<String, Uuid> {
    let mut entries = HashMap::new();
    for chunk in text.split("<Asset>").skip(1) {
        let Some(uuid) = first_uuid(chunk) else {
            continue;
        };
        let Some(path) = tag_value(chunk, "Path") else {
            continue;
        };
        let file_name = path
            .rsplit('/')
            .next()
            .unwrap_or(path.as_str())
            .trim()
            .to_string();
        entries.insert(file_name, uuid);
    }
    entries
}

/// Map of `asset UUID → hash` scraped from every PKL in the directory.
fn pkl_hashes(dir: &Path) -> DcpResult<HashMap<Uuid, String>> {
    let mut hashes = HashMap::new();
    let entries = std::fs::read_dir(dir).map_err(|source| DcpError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let upper = name.to_ascii_uppercase();
        if !(upper.starts_with("PKL_") && upper.ends_with(".XML")) {
            continue;
        }
        let text = read_text(&path)?;
        for chunk in text.split("<Asset>").skip(1) {
            if let (Some(uuid), Some(hash)) = (first_uuid(chunk), tag_value(chunk, "Hash")) {
                hashes.insert(uuid, hash.trim().to_string());
            }
        }
    }
    Ok(hashes)
}

fn find_file_with_prefix(dir: &Path, prefix: &str) -> DcpResult<PathBuf> {
    let entries = std::fs::read_dir(dir).map_err(|source| DcpError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries.flatten() {
        let path = entry.path();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.to_ascii_uppercase().starts_with(prefix) {
                return Ok(path);
            }
        }
    }
    Err(DcpError::NotADcp {
        path: dir.to_path_buf(),
    })
}

fn read_text(path: &Path) -> DcpResult<String> {
    std::fs::read_to_string(path).map_err(|source| DcpError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// First `urn:uuid:` occurrence in the text, parsed.
fn first_uuid(text: &str) -> Option<Uuid> {
    let start = text.find("urn:uuid:")? + "urn:uuid:".len();
    let candidate = text.get(start..start + 36)?;
    Uuid::parse_str(candidate).ok()
}

fn tag_value(text: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some(text[start..end].to_string())
}

fn tag_values(text: &str, tag: &str) -> Vec<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut values = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        let Some(end) = after.find(&close) else { break };
        values.push(after[..end].to_string());
        rest = &after[end + close.len()..];
    }
    values
}

fn count_tag(text: &str, needle: &str) -> usize {
    text.matches(needle).count()
}

fn kind_from_name(name: &str) -> &'static str {
    let upper = name.to_ascii_uppercase();
    if upper.contains("_TLR") {
        "trailer"
    } else if upper.contains("_ADV") {
        "advertisement"
    } else if upper.contains("_TST") {
        "test"
    } else if upper.contains("_SHR") {
        "short"
    } else {
        "feature"
    }
}

fn asset_type_from_name(name: &str) -> &'static str {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".mxf") {
        if lower.contains("pcm") || lower.contains("snd") || lower.contains("audio") {
            "sound"
        } else if lower.contains("sub") || lower.contains("tt") {
            "subtitle"
        } else {
            "picture"
        }
    } else {
        "metadata"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const ASSETMAP: &str = r#"<?xml version="1.0"?>
<AssetMap>
  <Id>urn:uuid:11111111-2222-3333-4444-555555555555</Id>
  <AssetList>
    <Asset>
      <Id>urn:uuid:aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee</Id>
      <ChunkList><Chunk><Path>picture.mxf</Path></Chunk></ChunkList>
    </Asset>
    <Asset>
      <Id>urn:uuid:aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeef0</Id>
      <ChunkList><Chunk><Path>sound_pcm.mxf</Path></Chunk></ChunkList>
    </Asset>
  </AssetList>
</AssetMap>"#;

    const CPL: &str = r#"<?xml version="1.0"?>
<CompositionPlaylist>
  <Id>urn:uuid:99999999-8888-7777-6666-555555555555</Id>
  <ContentTitleText>DemoMovie</ContentTitleText>
  <ContentKind>feature</ContentKind>
  <EditRate>24 1</EditRate>
  <ReelList>
    <Reel><AssetList><Duration>1000</Duration></AssetList></Reel>
    <Reel><AssetList><Duration>500</Duration></AssetList></Reel>
  </ReelList>
</CompositionPlaylist>"#;

    const PKL: &str = r#"<?xml version="1.0"?>
<PackingList>
  <Id>urn:uuid:12121212-3434-5656-7878-909090909090</Id>
  <AssetList>
    <Asset>
      <Id>urn:uuid:aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee</Id>
      <Hash>q1w2e3r4</Hash>
    </Asset>
  </AssetList>
</PackingList>"#;

    fn write_fixture(dir: &Path) {
        fs::write(dir.join("ASSETMAP.xml"), ASSETMAP).expect("assetmap");
        fs::write(dir.join("CPL_DemoMovie_FTR.xml"), CPL).expect("cpl");
        fs::write(dir.join("PKL_DemoMovie_FTR.xml"), PKL).expect("pkl");
        fs::write(dir.join("picture.mxf"), vec![0_u8; 2048]).expect("picture");
        fs::write(dir.join("sound_pcm.mxf"), vec![0_u8; 1024]).expect("sound");
    }

    #[test]
    fn scrapes_identity_and_assets() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = tmp.path().join("DemoMovie_FTR_2K");
        fs::create_dir_all(&dir).expect("dir");
        write_fixture(&dir);

        let metadata = ScrapeParser.parse(&dir).expect("parse");
        assert_eq!(
            metadata.assetmap_uuid,
            Uuid::parse_str("11111111-2222-3333-4444-555555555555").unwrap()
        );
        assert_eq!(metadata.content_title, "DemoMovie");
        assert_eq!(metadata.content_kind, "feature");
        assert_eq!(metadata.file_count, 5);
        assert_eq!(metadata.assets.len(), 2);
        assert_eq!(metadata.compositions.len(), 1);
        assert_eq!(metadata.compositions[0].reel_count, 2);
        assert_eq!(metadata.compositions[0].duration_frames, 1500);

        let picture = metadata
            .assets
            .iter()
            .find(|a| a.file_name == "picture.mxf")
            .expect("picture asset");
        assert_eq!(picture.asset_type, "picture");
        assert_eq!(picture.hash_value.as_deref(), Some("q1w2e3r4"));

        let sound = metadata
            .assets
            .iter()
            .find(|a| a.file_name == "sound_pcm.mxf")
            .expect("sound asset");
        assert_eq!(sound.asset_type, "sound");
        assert!(sound.hash_value.is_none());
    }

    #[test]
    fn rejects_non_dcp_directory() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let err = ScrapeParser.parse(tmp.path()).expect_err("must fail");
        assert!(matches!(err, DcpError::NotADcp { .. }));
    }
}
