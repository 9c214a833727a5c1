// src/output.rs
//
// One CSV row per active track per frame. Column order is the field order of
// `TrackRecord`; undefined motion values serialize as empty fields.

use crate::types::{BehaviorLabel, Pose, SwimDirection};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackRecord {
    pub frame_index: u64,
    pub time_s: f64,
    pub track_id: u64,
    pub centroid_x: f64,
    pub centroid_y: f64,
    pub speed_px_s: Option<f64>,
    pub displacement_px: Option<f64>,
    pub heading_deg: Option<f64>,
    pub area_px: f64,
    pub perimeter_px: f64,
    pub aspect_ratio: f64,
    pub elongation: f64,
    pub solidity: f64,
    pub pose: Pose,
    pub behavior: BehaviorLabel,
    pub swim_direction: SwimDirection,
}

pub const CSV_COLUMNS: [&str; 16] = [
    "frame_index",
    "time_s",
    "track_id",
    "centroid_x",
    "centroid_y",
    "speed_px_s",
    "displacement_px",
    "heading_deg",
    "area_px",
    "perimeter_px",
    "aspect_ratio",
    "elongation",
    "solidity",
    "pose",
    "behavior",
    "swim_direction",
];

pub struct RecordWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl RecordWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(inner),
        }
    }

    pub fn write(&mut self, record: &TrackRecord) -> Result<()> {
        self.writer.serialize(record)?;
        Ok(())
    }

    pub fn write_all(&mut self, records: &[TrackRecord]) -> Result<()> {
        for record in records {
            self.write(record)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush CSV writer: {}", e.error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(track_id: u64, speed: Option<f64>) -> TrackRecord {
        TrackRecord {
            frame_index: 3,
            time_s: 0.1,
            track_id,
            centroid_x: 12.5,
            centroid_y: 40.0,
            speed_px_s: speed,
            displacement_px: speed.map(|s| s / 10.0),
            heading_deg: None,
            area_px: 25.0,
            perimeter_px: 16.0,
            aspect_ratio: 1.0,
            elongation: 0.0,
            solidity: 1.0,
            pose: Pose::Ball,
            behavior: BehaviorLabel::Unknown,
            swim_direction: SwimDirection::None,
        }
    }

    fn render(records: &[TrackRecord]) -> String {
        let mut w = RecordWriter::new(Vec::new());
        w.write_all(records).unwrap();
        String::from_utf8(w.into_inner().unwrap()).unwrap()
    }

    #[test]
    fn test_header_matches_column_order() {
        let out = render(&[record(1, None)]);
        let header = out.lines().next().unwrap();
        assert_eq!(header, CSV_COLUMNS.join(","));
    }

    #[test]
    fn test_undefined_motion_is_empty_field() {
        let out = render(&[record(7, None)]);
        let row = out.lines().nth(1).unwrap();
        assert_eq!(row, "3,0.1,7,12.5,40.0,,,,25.0,16.0,1.0,0.0,1.0,ball,unknown,none");
    }

    #[test]
    fn test_one_line_per_record() {
        let mut w = RecordWriter::new(Vec::new());
        w.write(&record(1, Some(30.0))).unwrap();
        w.write(&record(2, None)).unwrap();
        let out = String::from_utf8(w.into_inner().unwrap()).unwrap();
        assert_eq!(out.lines().count(), 3);
    }

    #[test]
    fn test_create_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip_tracks.csv");
        let mut w = RecordWriter::create(&path).unwrap();
        w.write(&record(1, Some(12.0))).unwrap();
        w.flush().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("frame_index,"));
        assert!(text.contains(",12.0,1.2,"));
    }
}
