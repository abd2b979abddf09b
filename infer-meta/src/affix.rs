//! Time-aligns inference results with consumer frames.
//!
//! Inference usually runs on a lower frame rate (and often a lower
//! resolution) than the display path. The affixer stores recent
//! prediction trees keyed by presentation timestamp; a consumer asks for
//! the tree that best overlaps its frame's presentation interval and
//! gets a copy rescaled to its own resolution.

use std::collections::BTreeMap;

use log::{debug, trace};

use crate::prediction::PredictionTree;
use crate::Error;

/// Resolution of the frame a tree was inferred on or displayed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
}

/// Presentation timing of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMeta {
    pub pts: i64,
    pub duration: u64,
}

#[derive(Debug)]
struct Entry {
    duration: u64,
    width: u32,
    height: u32,
    tree: PredictionTree,
}

pub struct Affixer {
    /// Keyed by `(pts, seq)`: entries sharing a timestamp coexist, and
    /// iteration order gives both the eviction victim and the overlap
    /// tiebreak for free.
    store: BTreeMap<(i64, u64), Entry>,
    inference_duration: u64,
    max_entries: usize,
    last_pts: Option<i64>,
    selected_pts: Option<i64>,
    next_seq: u64,
}

impl Affixer {
    /// `inference_duration` is the presentation span of one inference
    /// result; `max_entries` bounds the store.
    pub fn new(inference_duration: u64, max_entries: usize) -> Result<Affixer, Error> {
        if inference_duration == 0 {
            return Err(Error::InvalidArg("inference duration must be nonzero"));
        }
        if max_entries == 0 {
            return Err(Error::InvalidArg("queue size must be nonzero"));
        }
        Ok(Affixer {
            store: BTreeMap::new(),
            inference_duration,
            max_entries,
            last_pts: None,
            selected_pts: None,
            next_seq: 0,
        })
    }

    /// Stores a deep copy of `tree` for the frame described by `frame` and
    /// `meta`. At capacity, the oldest entry (smallest pts, then smallest
    /// submission order) is evicted first.
    pub fn submit(
        &mut self,
        frame: &VideoInfo,
        meta: &FrameMeta,
        tree: &PredictionTree,
    ) -> Result<(), Error> {
        if frame.width == 0 || frame.height == 0 {
            return Err(Error::InvalidArg("inference frame has empty dimensions"));
        }
        if self.store.len() >= self.max_entries {
            let victim = *self.store.keys().next().expect("store is non-empty at capacity");
            self.store.remove(&victim);
            debug!("affixer full; evicted entry at pts {}", victim.0);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.store.insert(
            (meta.pts, seq),
            Entry {
                duration: meta.duration,
                width: frame.width,
                height: frame.height,
                tree: tree.deep_copy(),
            },
        );
        self.last_pts = Some(meta.pts);
        trace!("affixer holds {} entries after submit at pts {}", self.store.len(), meta.pts);
        Ok(())
    }

    /// Picks the stored tree for the consumer frame described by `frame`
    /// and `meta` and returns a copy rescaled to the consumer resolution,
    /// or `None` when nothing overlaps.
    ///
    /// With `sync_pts` the entry with the highest overlap percentage
    /// against `[pts, pts+duration)` wins, earliest submission breaking
    /// ties; without it the most recently submitted pts is used as-is.
    pub fn get_frame_meta(
        &mut self,
        sync_pts: bool,
        frame: &VideoInfo,
        meta: &FrameMeta,
    ) -> Result<Option<PredictionTree>, Error> {
        if frame.width == 0 || frame.height == 0 {
            return Err(Error::InvalidArg("consumer frame has empty dimensions"));
        }
        let selected = if sync_pts {
            self.best_overlap(meta)
        } else {
            match self.last_pts {
                Some(pts) => self
                    .store
                    .range((pts, 0)..=(pts, u64::MAX))
                    .next()
                    .map(|(k, e)| (*k, e)),
                None => None,
            }
        };
        let ((pts, _), entry) = match selected {
            Some(s) => s,
            None => {
                trace!("no stored inference overlaps pts {}", meta.pts);
                return Ok(None);
            }
        };
        let h = f64::from(frame.width) / f64::from(entry.width);
        let v = f64::from(frame.height) / f64::from(entry.height);
        let mut copy = entry.tree.deep_copy();
        self.selected_pts = Some(pts);
        for (_, p) in copy.iter_mut() {
            p.bbox.x = (f64::from(p.bbox.x) * h).floor() as i32;
            p.bbox.y = (f64::from(p.bbox.y) * v).floor() as i32;
            p.bbox.width = (f64::from(p.bbox.width) * h).round() as i32;
            p.bbox.height = (f64::from(p.bbox.height) * v).round() as i32;
            p.bbox_scaled = true;
        }
        trace!("selected inference at pts {} for frame at pts {}", pts, meta.pts);
        Ok(Some(copy))
    }

    /// Highest rounded overlap percentage between the query interval and
    /// each entry's `[pts, pts + inference_duration)`; strict improvement
    /// keeps the earliest-submitted winner on ties.
    fn best_overlap(&self, meta: &FrameMeta) -> Option<((i64, u64), &Entry)> {
        let q_start = meta.pts;
        let q_end = meta.pts.saturating_add(meta.duration as i64);
        let mut best: Option<(u32, (i64, u64), &Entry)> = None;
        for (&key, entry) in &self.store {
            let e_start = key.0;
            let e_end = e_start.saturating_add(self.inference_duration as i64);
            let overlap = std::cmp::min(q_end, e_end) - std::cmp::max(q_start, e_start);
            if overlap <= 0 {
                continue;
            }
            let pct = (100.0 * overlap as f64 / self.inference_duration as f64).round() as u32;
            if best.as_ref().map_or(true, |b| pct > b.0) {
                best = Some((pct, key, entry));
            }
        }
        best.map(|(_, key, entry)| (key, entry))
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
