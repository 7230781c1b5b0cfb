//! Per-tile result records and the `results.json` artifact

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Mutex;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::PatchResult;

/// Annotation box clipped to a tile, tile relative
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoxRecord {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
    pub class: String,
}

/// Mask image written for one tile and class
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MaskRecord {
    /// Path of the 0/1 PNG
    pub coords: String,
    pub class: String,
}

/// One accepted tile
///
/// Serialized without a tag; the method specific field tells the shapes
/// apart, so the variants with more fields are tried first when reading.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TileResult {
    Detection {
        x: u32,
        y: u32,
        w: u32,
        h: u32,
        bbs: Vec<BoxRecord>,
    },
    Segmentation {
        x: u32,
        y: u32,
        w: u32,
        h: u32,
        masks: Vec<MaskRecord>,
    },
    Classification {
        x: u32,
        y: u32,
        w: u32,
        h: u32,
        class: String,
    },
    Plain {
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    },
}

impl TileResult {
    /// Tile origin
    pub fn origin(&self) -> (u32, u32) {
        match self {
            TileResult::Detection { x, y, .. }
            | TileResult::Segmentation { x, y, .. }
            | TileResult::Classification { x, y, .. }
            | TileResult::Plain { x, y, .. } => (*x, *y),
        }
    }
}

/// Drop repeated records and order the rest by `x`, `y`, then serialized form
///
/// Two records are the same when they serialize to the same JSON, which is
/// how edge tiles covered twice by the grid collapse into one entry.
pub fn dedup(results: Vec<TileResult>) -> PatchResult<Vec<TileResult>> {
    let before = results.len();
    let mut keyed = BTreeMap::new();
    for result in results {
        let (x, y) = result.origin();
        let key = serde_json::to_string(&result)?;
        keyed.entry((x, y, key)).or_insert(result);
    }

    let unique: Vec<TileResult> = keyed.into_values().collect();
    debug!("Deduplicated {} results into {}", before, unique.len());
    Ok(unique)
}

/// Append-only result list shared by the worker threads
#[derive(Debug, Default)]
pub struct ResultCollector {
    results: Mutex<Vec<TileResult>>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&self, records: Vec<TileResult>) {
        if records.is_empty() {
            return;
        }
        // poisoned only when a worker panicked after pushing
        let mut results = self.results.lock().unwrap_or_else(|e| e.into_inner());
        results.extend(records);
    }

    pub fn len(&self) -> usize {
        self.results.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deduplicated, ordered records
    pub fn finish(self) -> PatchResult<Vec<TileResult>> {
        let results = self.results.into_inner().unwrap_or_else(|e| e.into_inner());
        dedup(results)
    }
}

/// Annotation thresholds as stored in the artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationThresholds {
    pub default: Option<f64>,
    pub classes: BTreeMap<String, f64>,
}

/// Contents of `results.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsFile {
    pub slide: String,
    pub method: String,
    pub wsi_width: u32,
    pub wsi_height: u32,
    pub patch_width: u32,
    pub patch_height: u32,
    pub overlap_width: u32,
    pub overlap_height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub start_sample: bool,
    pub finished_sample: bool,
    pub no_patches: bool,
    pub on_foreground: Option<f64>,
    pub on_annotation: AnnotationThresholds,
    pub save_to: String,
    pub classes: Vec<String>,
    pub result: Vec<TileResult>,
}

impl ResultsFile {
    /// Write the artifact as pretty printed JSON
    pub fn save(&self, path: &Path) -> PatchResult<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        info!("Wrote {} results to {}", self.result.len(), path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> PatchResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classified(x: u32, y: u32, class: &str) -> TileResult {
        TileResult::Classification {
            x,
            y,
            w: 256,
            h: 256,
            class: class.to_string(),
        }
    }

    #[test]
    fn duplicates_collapse() {
        let results = vec![
            classified(744, 0, "tumor"),
            classified(0, 0, "tumor"),
            classified(744, 0, "tumor"),
            classified(0, 0, "stroma"),
        ];
        let unique = dedup(results).unwrap();
        assert_eq!(
            unique,
            vec![classified(0, 0, "stroma"), classified(0, 0, "tumor"), classified(744, 0, "tumor")]
        );
    }

    #[test]
    fn records_serialize_flat() {
        let plain = serde_json::to_value(TileResult::Plain { x: 1, y: 2, w: 3, h: 4 }).unwrap();
        assert_eq!(plain, serde_json::json!({"x": 1, "y": 2, "w": 3, "h": 4}));

        let detection = TileResult::Detection {
            x: 0,
            y: 0,
            w: 256,
            h: 256,
            bbs: vec![BoxRecord { x: 10, y: 0, w: 20, h: 30, class: "mitosis".into() }],
        };
        let value = serde_json::to_value(&detection).unwrap();
        assert_eq!(value["bbs"][0]["class"], "mitosis");
        let back: TileResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, detection);

        let back: TileResult = serde_json::from_value(serde_json::json!({"x": 5, "y": 6, "w": 7, "h": 8, "class": "tumor"})).unwrap();
        assert_eq!(back, TileResult::Classification { x: 5, y: 6, w: 7, h: 8, class: "tumor".into() });
    }

    #[test]
    fn collector_merges_workers() {
        let collector = ResultCollector::new();
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| collector.extend(vec![classified(0, 0, "tumor")]));
            }
        });
        assert_eq!(collector.len(), 4);
        assert_eq!(collector.finish().unwrap().len(), 1);
    }
}
