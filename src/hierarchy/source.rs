use crate::geometry::codec::decode_geojson;
use crate::geometry::is_usable_areal;
use anyhow::{bail, Context};
use geo::Geometry;
use geojson::{Feature, GeoJson};
use log::{debug, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const PREFECTURE_PROPERTY: &str = "PREF_NAME";
pub const MUNICIPALITY_PROPERTY: &str = "CITY_NAME";
const DIR_SUFFIX: &str = "GeoJSON";

/// One polygon part of a municipality as found in the source data.
#[derive(Debug, Clone)]
pub struct RawShape {
    pub prefecture: String,
    pub municipality: String,
    pub geometry: Geometry<f64>,
}

impl RawShape {
    pub fn new(
        prefecture: impl Into<String>,
        municipality: impl Into<String>,
        geometry: Geometry<f64>,
    ) -> Self {
        Self {
            prefecture: prefecture.into(),
            municipality: municipality.into(),
            geometry,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub files_read: usize,
    pub files_failed: usize,
    pub features_read: usize,
    pub missing_names: usize,
    pub invalid_geometry: usize,
}

impl SourceStats {
    pub fn features_skipped(&self) -> usize {
        self.missing_names + self.invalid_geometry
    }
}

/// Reads `<root>/*GeoJSON/*.json`, each a FeatureCollection of municipal
/// boundary parts.
#[derive(Debug, Clone)]
pub struct SourceReader {
    root: PathBuf,
}

impl SourceReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Source files in path order.
    pub fn discover(&self) -> anyhow::Result<Vec<PathBuf>> {
        if !self.root.is_dir() {
            bail!("source root {} is not a directory", self.root.display());
        }
        let mut files = Vec::new();
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("listing {}", self.root.display()))?;
        for entry in entries.flatten() {
            let dir = entry.path();
            let is_source_dir = dir.is_dir()
                && dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(DIR_SUFFIX));
            if !is_source_dir {
                continue;
            }
            let Ok(inner) = fs::read_dir(&dir) else {
                warn!("cannot list {}", dir.display());
                continue;
            };
            for file in inner.flatten() {
                let path = file.path();
                if path.is_file() && path.extension().is_some_and(|e| e == "json") {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Reads every source file. Bad files and features are counted and
    /// skipped; only a missing root is an error.
    pub fn read_all(&self) -> anyhow::Result<(Vec<RawShape>, SourceStats)> {
        let files = self.discover()?;
        let mut stats = SourceStats::default();
        let mut shapes = Vec::new();
        for path in files {
            let text = match fs::read_to_string(&path) {
                Ok(t) => t,
                Err(e) => {
                    warn!("skipping unreadable {}: {e}", path.display());
                    stats.files_failed += 1;
                    continue;
                }
            };
            match parse_collection(&text, &mut stats) {
                Ok(mut parsed) => {
                    debug!("{}: {} shapes", path.display(), parsed.len());
                    stats.files_read += 1;
                    shapes.append(&mut parsed);
                }
                Err(e) => {
                    warn!("skipping malformed {}: {e}", path.display());
                    stats.files_failed += 1;
                }
            }
        }
        Ok((shapes, stats))
    }
}

/// Parses one document. A lone Feature is accepted as a one-element
/// collection.
pub fn parse_collection(text: &str, stats: &mut SourceStats) -> anyhow::Result<Vec<RawShape>> {
    let features = match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(fc) => fc.features,
        GeoJson::Feature(f) => vec![f],
        GeoJson::Geometry(_) => bail!("bare geometry without name properties"),
    };

    let mut shapes = Vec::with_capacity(features.len());
    for feature in features {
        stats.features_read += 1;
        if let Some(shape) = feature_to_shape(feature, stats) {
            shapes.push(shape);
        }
    }
    Ok(shapes)
}

fn feature_to_shape(feature: Feature, stats: &mut SourceStats) -> Option<RawShape> {
    let prefecture = string_property(&feature, PREFECTURE_PROPERTY);
    let municipality = string_property(&feature, MUNICIPALITY_PROPERTY);
    let (Some(prefecture), Some(municipality)) = (prefecture, municipality) else {
        stats.missing_names += 1;
        return None;
    };

    let geometry = feature
        .geometry
        .and_then(|g| decode_geojson(g).ok())
        .filter(is_usable_areal);
    match geometry {
        Some(geometry) => Some(RawShape {
            prefecture,
            municipality,
            geometry,
        }),
        None => {
            debug!("invalid geometry for {prefecture}/{municipality}");
            stats.invalid_geometry += 1;
            None
        }
    }
}

fn string_property(feature: &Feature, key: &str) -> Option<String> {
    feature
        .property(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHIBUYA: &str = r#"{"type":"FeatureCollection","features":[
        {"type":"Feature","properties":{"PREF_NAME":"東京都","CITY_NAME":"渋谷区"},
         "geometry":{"type":"Polygon","coordinates":[[[139.66,35.64],[139.72,35.64],[139.72,35.69],[139.66,35.69],[139.66,35.64]]]}},
        {"type":"Feature","properties":{"PREF_NAME":"東京都","CITY_NAME":null},
         "geometry":{"type":"Polygon","coordinates":[[[139.0,35.0],[139.1,35.0],[139.1,35.1],[139.0,35.0]]]}},
        {"type":"Feature","properties":{"PREF_NAME":"東京都","CITY_NAME":"新宿区"},
         "geometry":{"type":"Polygon","coordinates":[[[139.6,35.6],[139.7,35.7],[139.7,35.6],[139.6,35.7],[139.6,35.6]]]}},
        {"type":"Feature","properties":{"PREF_NAME":"東京都","CITY_NAME":"港区"},"geometry":null}
    ]}"#;

    #[test]
    fn parse_counts_skips() {
        let mut stats = SourceStats::default();
        let shapes = parse_collection(SHIBUYA, &mut stats).unwrap();
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].municipality, "渋谷区");
        assert_eq!(stats.features_read, 4);
        assert_eq!(stats.missing_names, 1);
        // 自相交 + 空几何
        assert_eq!(stats.invalid_geometry, 2);
        assert_eq!(stats.features_skipped(), 3);
    }

    #[test]
    fn multipolygon_feature_with_repeated_vertex_is_kept() {
        // 离岛 + 本土，本土环带重复顶点
        let text = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"PREF_NAME":"長崎県","CITY_NAME":"五島市"},
             "geometry":{"type":"MultiPolygon","coordinates":[
                [[[128.7,32.6],[128.9,32.6],[128.9,32.6],[128.9,32.8],[128.7,32.8],[128.7,32.6]]],
                [[[129.0,32.9],[129.1,32.9],[129.1,33.0],[129.0,33.0],[129.0,32.9]]]
             ]}}
        ]}"#;
        let mut stats = SourceStats::default();
        let shapes = parse_collection(text, &mut stats).unwrap();
        assert_eq!(stats.invalid_geometry, 0);
        assert_eq!(shapes.len(), 1);
        match &shapes[0].geometry {
            Geometry::MultiPolygon(mp) => assert_eq!(mp.0.len(), 2),
            other => panic!("expected multipolygon, got {other:?}"),
        }
    }

    #[test]
    fn reads_only_geojson_folders() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("13_東京都GeoJSON");
        fs::create_dir(&good).unwrap();
        fs::write(good.join("13101.json"), SHIBUYA).unwrap();
        fs::write(good.join("broken.json"), "{not json").unwrap();
        fs::write(good.join("notes.txt"), "ignored").unwrap();
        let other = dir.path().join("shapefiles");
        fs::create_dir(&other).unwrap();
        fs::write(other.join("x.json"), SHIBUYA).unwrap();

        let reader = SourceReader::new(dir.path());
        assert_eq!(reader.discover().unwrap().len(), 2);

        let (shapes, stats) = reader.read_all().unwrap();
        assert_eq!(shapes.len(), 1);
        assert_eq!(stats.files_read, 1);
        assert_eq!(stats.files_failed, 1);
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let reader = SourceReader::new(dir.path().join("nope"));
        assert!(reader.read_all().is_err());
    }
}
