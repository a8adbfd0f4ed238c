//! Scene depth buffer tracking and selection.
//!
//! The host records which depth buffers the application draws with through a
//! [`DepthTracker`]: binds, draws and clears. Once per frame the runtime asks a
//! [`DepthSelector`] for the most plausible scene depth buffer and aliases it
//! to every effect texture declared as the depth buffer.
//!
//! # Selection
//!
//! 1. A manual override wins unconditionally.
//! 2. Candidates without draw calls or with multisampling are skipped.
//! 3. With aspect filtering on, candidates whose size does not plausibly
//!    match the backbuffer are skipped.
//! 4. The candidate with the most vertices wins; ties go to more draw calls,
//!    then to the lower resource id.
//!
//! When clears are preserved, the snapshot taken at the configured clear is
//! aliased instead of the live buffer. Clear indices are 1-based and
//! `u32::MAX` picks the last clear.

use std::collections::BTreeMap;

use postfx_core::Format;
use tracing::trace;

use crate::backend::{ResourceId, TextureDesc};
use crate::config::DepthConfig;

/// Maximum aspect ratio difference between a candidate and the backbuffer.
pub const ASPECT_RATIO_TOLERANCE: f32 = 0.1;

/// Accepted range of backbuffer-to-candidate size ratios, per axis.
pub const SIZE_RATIO_RANGE: (f32, f32) = (0.5, 1.85);

/// Draw statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawStats {
    pub vertices: u32,
    pub drawcalls: u32,
}

impl DrawStats {
    pub(crate) fn record(&mut self, vertices: u32) {
        self.vertices = self.vertices.saturating_add(vertices);
        self.drawcalls = self.drawcalls.saturating_add(1);
    }
}

/// Draws recorded on a depth buffer between two clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearRecord {
    pub stats: DrawStats,
    /// Copy of the depth buffer taken right before the clear.
    pub snapshot: Option<ResourceId>,
}

/// One depth buffer seen this frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthCandidate {
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
    pub format: Format,
    pub total_stats: DrawStats,
    /// Draws since the last clear.
    pub current_stats: DrawStats,
    pub clears: Vec<ClearRecord>,
}

impl DepthCandidate {
    fn new(desc: &TextureDesc) -> Self {
        Self {
            width: desc.width,
            height: desc.height,
            sample_count: desc.sample_count,
            format: desc.format,
            total_stats: DrawStats::default(),
            current_stats: DrawStats::default(),
            clears: Vec::new(),
        }
    }

    pub fn is_multisampled(&self) -> bool {
        self.sample_count > 1
    }

    /// Whether the size plausibly matches a `width` x `height` backbuffer.
    pub fn matches_aspect_ratio(&self, width: u32, height: u32) -> bool {
        if self.width == 0 || self.height == 0 || height == 0 {
            return false;
        }
        let aspect = self.width as f32 / self.height as f32;
        let target = width as f32 / height as f32;
        let width_ratio = width as f32 / self.width as f32;
        let height_ratio = height as f32 / self.height as f32;
        let (min, max) = SIZE_RATIO_RANGE;

        (aspect - target).abs() <= ASPECT_RATIO_TOLERANCE
            && (min..=max).contains(&width_ratio)
            && (min..=max).contains(&height_ratio)
    }
}

/// Per-frame record of the application's depth buffer usage.
#[derive(Debug, Clone, Default)]
pub struct DepthTracker {
    candidates: BTreeMap<ResourceId, DepthCandidate>,
    current: Option<ResourceId>,
    total: DrawStats,
}

impl DepthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that the application bound `resource` as its depth buffer.
    pub fn bind_depth_buffer(&mut self, resource: ResourceId, desc: &TextureDesc) {
        self.candidates
            .entry(resource)
            .or_insert_with(|| DepthCandidate::new(desc));
        self.current = Some(resource);
    }

    /// Records that the application unbound its depth buffer.
    pub fn unbind_depth_buffer(&mut self) {
        self.current = None;
    }

    /// Records an application draw against the bound depth buffer, if any.
    pub fn record_draw(&mut self, vertices: u32) {
        self.total.record(vertices);
        if let Some(candidate) = self.current.and_then(|id| self.candidates.get_mut(&id)) {
            candidate.total_stats.record(vertices);
            candidate.current_stats.record(vertices);
        }
    }

    /// Records a clear of `resource`, with the copy taken right before it.
    pub fn record_clear(&mut self, resource: ResourceId, snapshot: Option<ResourceId>) {
        if let Some(candidate) = self.candidates.get_mut(&resource) {
            let stats = std::mem::take(&mut candidate.current_stats);
            candidate.clears.push(ClearRecord { stats, snapshot });
        }
    }

    /// Starts a new frame.
    pub fn reset(&mut self) {
        self.candidates.clear();
        self.current = None;
        self.total = DrawStats::default();
    }

    /// Draws of the whole frame, with or without a depth buffer.
    pub fn total_stats(&self) -> DrawStats {
        self.total
    }

    pub fn current_depth_buffer(&self) -> Option<ResourceId> {
        self.current
    }

    pub fn candidate(&self, resource: ResourceId) -> Option<&DepthCandidate> {
        self.candidates.get(&resource)
    }

    /// Candidates in resource id order.
    pub fn candidates(&self) -> impl Iterator<Item = (ResourceId, &DepthCandidate)> {
        self.candidates.iter().map(|(&id, c)| (id, c))
    }
}

/// Outcome of depth buffer selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthSelection {
    /// The selected application depth buffer.
    pub depth_buffer: ResourceId,
    /// Resource to alias: the depth buffer or a preserved snapshot of it.
    pub texture: ResourceId,
    /// 1-based clear the snapshot was taken at.
    pub clear_index: Option<u32>,
}

/// Depth buffer selection settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DepthSelector {
    pub filter_aspect_ratio: bool,
    /// Clear to alias, `None` to alias the live buffer.
    pub clear_index: Option<u32>,
    pub override_texture: Option<ResourceId>,
}

impl DepthSelector {
    pub fn from_config(config: &DepthConfig) -> Self {
        Self {
            filter_aspect_ratio: config.filter_aspect_ratio,
            clear_index: config.effective_clear_index(),
            override_texture: None,
        }
    }

    /// Picks the scene depth buffer for a `width` x `height` backbuffer.
    pub fn select(&self, tracker: &DepthTracker, width: u32, height: u32) -> Option<DepthSelection> {
        let depth_buffer = match self.override_texture {
            Some(resource) => resource,
            None => self.best_candidate(tracker, width, height)?,
        };

        let Some((texture, clear_index)) = self.preserved_clear(tracker, depth_buffer) else {
            return Some(DepthSelection {
                depth_buffer,
                texture: depth_buffer,
                clear_index: None,
            });
        };

        Some(DepthSelection {
            depth_buffer,
            texture,
            clear_index: Some(clear_index),
        })
    }

    fn best_candidate(&self, tracker: &DepthTracker, width: u32, height: u32) -> Option<ResourceId> {
        let mut best: Option<(ResourceId, &DepthCandidate)> = None;

        for (id, candidate) in tracker.candidates() {
            if candidate.total_stats.drawcalls == 0 || candidate.is_multisampled() {
                continue;
            }
            if self.filter_aspect_ratio && !candidate.matches_aspect_ratio(width, height) {
                trace!(id = id.0, width = candidate.width, height = candidate.height, "depth candidate rejected by aspect ratio");
                continue;
            }

            let better = best.is_none_or(|(_, current)| {
                let a = candidate.total_stats;
                let b = current.total_stats;
                (a.vertices, a.drawcalls) > (b.vertices, b.drawcalls)
            });
            if better {
                best = Some((id, candidate));
            }
        }

        best.map(|(id, _)| id)
    }

    fn preserved_clear(&self, tracker: &DepthTracker, depth_buffer: ResourceId) -> Option<(ResourceId, u32)> {
        let index = self.clear_index?;
        let clears = &tracker.candidate(depth_buffer)?.clears;
        let count = u32::try_from(clears.len()).ok().filter(|&n| n > 0)?;

        let index = if index == 0 || index > count { count } else { index };
        let snapshot = clears[index as usize - 1].snapshot.unwrap_or(depth_buffer);
        Some((snapshot, index))
    }
}
