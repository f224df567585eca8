//! IoU-based tracker for maintaining person identity across frames.
//!
//! Uses greedy matching by Intersection over Union to track people
//! between consecutive detector passes.

use std::collections::HashMap;

use nearsense_models::BoundingBox;

#[derive(Debug, Clone)]
struct Track {
    bbox: BoundingBox,
    /// Passes since last match
    age: u32,
}

/// Simple IoU-based tracker.
pub struct IoUTracker {
    iou_threshold: f64,
    /// Maximum unmatched passes before a track is deleted
    max_gap: u32,
    tracks: HashMap<u32, Track>,
    next_track_id: u32,
}

impl IoUTracker {
    /// Create a new tracker.
    pub fn new(iou_threshold: f64, max_gap: u32) -> Self {
        Self {
            iou_threshold,
            max_gap,
            tracks: HashMap::new(),
            next_track_id: 1,
        }
    }

    /// Assign track ids to detections.
    ///
    /// Input and output are `(bbox, confidence)` / `(track_id, bbox, confidence)`,
    /// in input order.
    pub fn update(&mut self, detections: &[(BoundingBox, f64)]) -> Vec<(u32, BoundingBox, f64)> {
        let mut unmatched_tracks: Vec<u32> = self.tracks.keys().copied().collect();
        unmatched_tracks.sort_unstable();

        let mut assigned = Vec::with_capacity(detections.len());

        for &(bbox, score) in detections {
            let mut best_iou = self.iou_threshold;
            let mut best_track: Option<u32> = None;

            for &track_id in &unmatched_tracks {
                if let Some(track) = self.tracks.get(&track_id) {
                    let iou = bbox.iou(&track.bbox);
                    if iou > best_iou {
                        best_iou = iou;
                        best_track = Some(track_id);
                    }
                }
            }

            let track_id = match best_track {
                Some(id) => {
                    unmatched_tracks.retain(|&t| t != id);
                    id
                }
                None => {
                    let id = self.next_track_id;
                    self.next_track_id += 1;
                    id
                }
            };

            self.tracks.insert(track_id, Track { bbox, age: 0 });
            assigned.push((track_id, bbox, score));
        }

        // Age unmatched tracks
        for track_id in unmatched_tracks {
            let expired = match self.tracks.get_mut(&track_id) {
                Some(track) => {
                    track.age += 1;
                    track.age > self.max_gap
                }
                None => false,
            };
            if expired {
                self.tracks.remove(&track_id);
            }
        }

        assigned
    }

    /// Number of live tracks (matched or within the gap).
    #[cfg(test)]
    fn track_count(&self) -> usize {
        self.tracks.len()
    }
}
