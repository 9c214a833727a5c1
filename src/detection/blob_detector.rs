// src/detection/blob_detector.rs
//
// Blob Detector: binarize the masked intensity frame, optionally clean the
// mask up with closing/opening, then extract 8-connected components and
// filter them by area, bounding-box extent and distance to the frame border.
//
// Stateless: one frame in, an ordered list of detections out.

use super::types::Detection;
use crate::preprocessing::RoiMask;
use crate::types::{Config, MaskedFrame, ThresholdMethod};
use image::{GrayImage, Luma};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Radius of the elliptical structuring element for a kernel diameter.
/// Diameters below 2 switch the step off.
fn kernel_radius(diameter: u32) -> Option<u8> {
    if diameter < 2 {
        return None;
    }
    Some((diameter / 2).min(u8::MAX as u32) as u8)
}

pub struct BlobDetector {
    thresh: u8,
    method: ThresholdMethod,
    min_area: usize,
    max_area: usize,
    min_wh: usize,
    max_wh: usize,
    border_margin: f64,
    max_foreground_pixels: Option<usize>,
    close_radius: Option<u8>,
    open_radius: Option<u8>,
}

impl BlobDetector {
    pub fn new(config: &Config) -> Self {
        let cal = &config.calibration;
        Self {
            thresh: cal.thresh,
            method: config.detection.thresh_method,
            min_area: cal.min_area as usize,
            max_area: cal.max_area as usize,
            min_wh: cal.min_wh as usize,
            max_wh: cal.max_wh as usize,
            border_margin: config.detection.border_margin_px,
            max_foreground_pixels: config.detection.max_foreground_pixels,
            close_radius: kernel_radius(config.detection.close_kernel),
            open_radius: kernel_radius(config.detection.open_kernel),
        }
    }

    /// Detections for one frame, ordered by ascending centroid x then y.
    pub fn detect(&self, frame: &MaskedFrame, mask: &RoiMask) -> Vec<Detection> {
        let (w, h) = (frame.width, frame.height);
        let Some(gray) = GrayImage::from_raw(w as u32, h as u32, frame.data.clone()) else {
            warn!(
                "Frame {}: buffer of {} bytes does not match {}x{}",
                frame.index,
                frame.data.len(),
                w,
                h
            );
            return Vec::new();
        };
        let thresh = self.effective_threshold(frame, mask);

        let mut binary = threshold(&gray, thresh, ThresholdType::Binary);

        let foreground = binary.pixels().filter(|p| p[0] > 0).count();
        if let Some(limit) = self.max_foreground_pixels {
            if foreground > limit {
                debug!(
                    "Frame {}: {} foreground pixels exceed limit {}, skipping detection",
                    frame.index, foreground, limit
                );
                return Vec::new();
            }
        }

        if let Some(k) = self.close_radius {
            binary = close(&binary, Norm::L2, k);
        }
        if let Some(k) = self.open_radius {
            binary = open(&binary, Norm::L2, k);
        }

        let mut detections: Vec<Detection> = components(&binary)
            .into_iter()
            .filter_map(Detection::from_pixels)
            .filter(|d| self.accepts(d, w, h))
            .collect();

        detections.sort_by(|a, b| {
            a.centroid
                .0
                .total_cmp(&b.centroid.0)
                .then(a.centroid.1.total_cmp(&b.centroid.1))
        });

        debug!(
            "Frame {}: threshold={}, foreground={}, detections={}",
            frame.index,
            thresh,
            foreground,
            detections.len()
        );

        detections
    }

    /// Otsu runs over ROI pixels only, so the zeroed outside of the mask
    /// does not drag the level down.
    fn effective_threshold(&self, frame: &MaskedFrame, mask: &RoiMask) -> u8 {
        match self.method {
            ThresholdMethod::Fixed => self.thresh,
            ThresholdMethod::Otsu => {
                let roi: Vec<u8> = frame
                    .data
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| mask.contains_index(*idx))
                    .map(|(_, &v)| v)
                    .collect();
                match GrayImage::from_raw(roi.len() as u32, 1, roi) {
                    Some(strip) if strip.width() > 0 => otsu_level(&strip),
                    _ => self.thresh,
                }
            }
        }
    }

    fn accepts(&self, det: &Detection, frame_w: usize, frame_h: usize) -> bool {
        if det.area < self.min_area || det.area > self.max_area {
            return false;
        }
        let extent_ok = |v: usize| v >= self.min_wh && v <= self.max_wh;
        if !extent_ok(det.bbox.width) || !extent_ok(det.bbox.height) {
            return false;
        }
        let (cx, cy) = det.centroid;
        let m = self.border_margin;
        !(cx <= m || cy <= m || cx >= frame_w as f64 - m || cy >= frame_h as f64 - m)
    }
}

/// 8-connected components of a binary image, each as its member pixels in
/// row-major order. Components come out in label order.
fn components(binary: &GrayImage) -> Vec<Vec<(usize, usize)>> {
    let labels = connected_components(binary, Connectivity::Eight, Luma([0u8]));
    let mut by_label: BTreeMap<u32, Vec<(usize, usize)>> = BTreeMap::new();
    for (x, y, label) in labels.enumerate_pixels() {
        if label[0] != 0 {
            by_label
                .entry(label[0])
                .or_default()
                .push((x as usize, y as usize));
        }
    }
    by_label.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MaskConfig;

    fn frame_with(w: usize, h: usize, blobs: &[(usize, usize, usize, usize, u8)]) -> MaskedFrame {
        let mut data = vec![0u8; w * h];
        for &(x0, y0, bw, bh, v) in blobs {
            for y in y0..y0 + bh {
                for x in x0..x0 + bw {
                    data[y * w + x] = v;
                }
            }
        }
        MaskedFrame {
            index: 0,
            timestamp_s: 0.0,
            width: w,
            height: h,
            data,
        }
    }

    fn full_mask(w: usize, h: usize) -> RoiMask {
        RoiMask::new(&Config::default().calibration.mask, w, h).unwrap()
    }

    #[test]
    fn test_empty_frame_yields_no_detections() {
        let detector = BlobDetector::new(&Config::default());
        let frame = frame_with(64, 64, &[]);
        assert!(detector.detect(&frame, &full_mask(64, 64)).is_empty());
    }

    #[test]
    fn test_detects_square_with_centroid() {
        let detector = BlobDetector::new(&Config::default());
        let frame = frame_with(64, 64, &[(20, 30, 6, 4, 200)]);
        let dets = detector.detect(&frame, &full_mask(64, 64));
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert_eq!(d.area, 24);
        assert_eq!((d.bbox.width, d.bbox.height), (6, 4));
        assert!((d.centroid.0 - 22.5).abs() < 1e-9);
        assert!((d.centroid.1 - 31.5).abs() < 1e-9);
    }

    #[test]
    fn test_area_and_extent_filters() {
        let mut config = Config::default();
        config.calibration.min_area = 10;
        config.calibration.max_area = 100;
        config.calibration.max_wh = 20;
        let detector = BlobDetector::new(&config);
        let frame = frame_with(
            128,
            128,
            &[
                (5, 5, 2, 2, 255),    // area 4: too small
                (30, 30, 5, 5, 255),  // kept
                (60, 60, 12, 12, 255), // area 144: too large
                (10, 90, 25, 1, 255), // width 25: too wide
            ],
        );
        let dets = detector.detect(&frame, &full_mask(128, 128));
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].area, 25);
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut config = Config::default();
        config.calibration.thresh = 100;
        let detector = BlobDetector::new(&config);
        let frame = frame_with(32, 32, &[(10, 10, 5, 5, 100), (20, 20, 5, 5, 101)]);
        let dets = detector.detect(&frame, &full_mask(32, 32));
        assert_eq!(dets.len(), 1);
        assert!((dets[0].centroid.0 - 22.0).abs() < 1e-9);
    }

    #[test]
    fn test_output_sorted_by_centroid_x() {
        let detector = BlobDetector::new(&Config::default());
        let frame = frame_with(
            100,
            100,
            &[(70, 10, 4, 4, 255), (10, 80, 4, 4, 255), (40, 40, 4, 4, 255)],
        );
        let dets = detector.detect(&frame, &full_mask(100, 100));
        let xs: Vec<f64> = dets.iter().map(|d| d.centroid.0).collect();
        assert_eq!(xs, vec![11.5, 41.5, 71.5]);
    }

    #[test]
    fn test_diagonal_pixels_are_connected() {
        let mut config = Config::default();
        config.calibration.min_area = 1;
        config.calibration.min_wh = 1;
        let detector = BlobDetector::new(&config);
        let mut frame = frame_with(20, 20, &[]);
        for i in 5..10 {
            frame.data[i * 20 + i] = 255;
        }
        let dets = detector.detect(&frame, &full_mask(20, 20));
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].area, 5);
    }

    #[test]
    fn test_border_blobs_are_rejected() {
        let detector = BlobDetector::new(&Config::default());
        let frame = frame_with(40, 40, &[(0, 10, 4, 4, 255), (36, 20, 4, 4, 255)]);
        // centroids at x=1.5 and x=37.5, inside the 2px margin
        assert!(detector.detect(&frame, &full_mask(40, 40)).is_empty());
    }

    #[test]
    fn test_centroid_on_margin_is_rejected() {
        let detector = BlobDetector::new(&Config::default());
        let frame = frame_with(
            40,
            40,
            &[
                (1, 10, 3, 4, 255),  // centroid x = 2.0
                (37, 20, 3, 4, 255), // centroid x = 38.0 = width - margin
                (3, 30, 3, 4, 255),  // centroid x = 4.0
            ],
        );
        let dets = detector.detect(&frame, &full_mask(40, 40));
        assert_eq!(dets.len(), 1);
        assert!((dets[0].centroid.0 - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_foreground_energy_gate() {
        let mut config = Config::default();
        config.detection.max_foreground_pixels = Some(20);
        let detector = BlobDetector::new(&config);
        let frame = frame_with(40, 40, &[(10, 10, 5, 5, 255)]);
        assert!(detector.detect(&frame, &full_mask(40, 40)).is_empty());
    }

    #[test]
    fn test_closing_merges_split_blob() {
        let mut config = Config::default();
        config.detection.close_kernel = 3;
        let detector = BlobDetector::new(&config);
        // two 4x4 halves separated by a one-pixel gap
        let frame = frame_with(40, 40, &[(10, 10, 4, 4, 255), (15, 10, 4, 4, 255)]);
        let dets = detector.detect(&frame, &full_mask(40, 40));
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox.width, 9);
    }

    #[test]
    fn test_opening_removes_speckle() {
        let mut config = Config::default();
        config.calibration.min_area = 1;
        config.calibration.min_wh = 1;
        config.detection.open_kernel = 3;
        let detector = BlobDetector::new(&config);
        let mut frame = frame_with(40, 40, &[(20, 20, 6, 6, 255)]);
        frame.data[5 * 40 + 5] = 255;
        let dets = detector.detect(&frame, &full_mask(40, 40));
        assert_eq!(dets.len(), 1);
        assert!(dets[0].area > 1);
    }

    #[test]
    fn test_otsu_level_uses_roi_pixels_only() {
        let mut config = Config::default();
        config.detection.thresh_method = ThresholdMethod::Otsu;
        let detector = BlobDetector::new(&config);

        let mask_cfg = MaskConfig {
            enabled: true,
            xc: 32.0,
            yc: 32.0,
            radius: 10.0,
        };
        let mask = RoiMask::new(&mask_cfg, 64, 64).unwrap();
        // zero outside the circle, 100 inside, a bright 3x3 blob at the centre
        let mut frame = frame_with(64, 64, &[(31, 31, 3, 3, 200)]);
        for (idx, v) in frame.data.iter_mut().enumerate() {
            if mask.contains_index(idx) && *v == 0 {
                *v = 100;
            }
        }
        let t = detector.effective_threshold(&frame, &mask);
        assert!((100..200).contains(&t), "threshold {}", t);
    }

    #[test]
    fn test_otsu_detection() {
        let mut config = Config::default();
        config.detection.thresh_method = ThresholdMethod::Otsu;
        config.calibration.thresh = 250;
        let detector = BlobDetector::new(&config);
        let mut frame = frame_with(40, 40, &[(15, 15, 5, 5, 120)]);
        for v in frame.data.iter_mut() {
            if *v == 0 {
                *v = 30;
            }
        }
        let dets = detector.detect(&frame, &full_mask(40, 40));
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].area, 25);
    }
}
