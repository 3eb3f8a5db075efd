//! Pixel-level fusion of reprojected frames.
//!
//! Strategies, with NaN as the only missing-data marker:
//! - `max`: greatest valid value per pixel
//! - `average`: mean of the valid values per pixel
//! - `priority`: first valid value in the configured trust order
//!
//! A pixel valid in exactly one frame yields that value under every strategy.

use std::collections::HashSet;

use rayon::prelude::*;
use tracing::{info, warn};

use radar_common::{
    validate_source_name, MergeStrategy, MergedFrame, RadarError, RadarResult, ReprojectedFrame,
};

/// Fuses frames sharing one target grid and synchronization timestamp.
#[derive(Debug, Clone, Default)]
pub struct MergeEngine {
    priority: Vec<String>,
}

impl MergeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust ordering used by `priority` merges, most trusted first.
    ///
    /// Sources missing from the list rank after it, in input order.
    pub fn with_priority<I, S>(sources: I) -> RadarResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let priority = sources
            .into_iter()
            .map(|s| validate_source_name(s.as_ref()))
            .collect::<RadarResult<Vec<_>>>()?;
        Ok(Self { priority })
    }

    pub fn priority(&self) -> &[String] {
        &self.priority
    }

    /// Merge one synchronization bucket.
    ///
    /// Returns `Ok(None)` (with a warning) when there are no frames. Frames
    /// must come from distinct sources and share dimensions and extent.
    pub fn merge(
        &self,
        frames: &[ReprojectedFrame],
        strategy: MergeStrategy,
    ) -> RadarResult<Option<MergedFrame>> {
        let Some(first) = frames.first() else {
            warn!(strategy = %strategy, "No frames to merge, skipping composite");
            return Ok(None);
        };

        self.check_compatible(frames)?;
        let ordered = self.ordered(frames);

        if ordered.iter().any(|f| f.timestamp != first.timestamp) {
            warn!(
                timestamp = %first.timestamp,
                "Merging frames with differing timestamps, using the first"
            );
        }

        let (data, fill_counts) = match strategy {
            MergeStrategy::Max => (merge_max(&ordered), Vec::new()),
            MergeStrategy::Average => (merge_average(&ordered), Vec::new()),
            MergeStrategy::Priority => merge_priority(&ordered),
        };

        let contributing: Vec<String> = ordered
            .iter()
            .filter(|f| f.valid_count() > 0)
            .map(|f| f.source.clone())
            .collect();

        let merged = MergedFrame::new(
            first.timestamp.clone(),
            data,
            first.extent.clone(),
            first.dimensions(),
            strategy,
            contributing,
            fill_counts,
        );

        let (height, width) = merged.dimensions();
        info!(
            strategy = %strategy,
            timestamp = %merged.timestamp(),
            sources = ?merged.contributing_sources(),
            valid_pixels = merged.valid_count(),
            total_pixels = height * width,
            "Merged composite"
        );

        Ok(Some(merged))
    }

    /// Merge the same bucket under several strategies.
    pub fn merge_all(
        &self,
        frames: &[ReprojectedFrame],
        strategies: &[MergeStrategy],
    ) -> RadarResult<Vec<MergedFrame>> {
        let mut out = Vec::with_capacity(strategies.len());
        for strategy in strategies {
            if let Some(merged) = self.merge(frames, *strategy)? {
                out.push(merged);
            }
        }
        Ok(out)
    }

    fn check_compatible(&self, frames: &[ReprojectedFrame]) -> RadarResult<()> {
        let Some(first) = frames.first() else {
            return Ok(());
        };
        let mut seen = HashSet::new();

        for frame in frames {
            if !seen.insert(frame.source.as_str()) {
                return Err(RadarError::DuplicateSource(frame.source.clone()));
            }
            if frame.dimensions() != first.dimensions()
                || frame.data.len() != first.height * first.width
            {
                return Err(RadarError::ShapeMismatch {
                    source_name: frame.source.clone(),
                    expected: first.dimensions(),
                    actual: frame.dimensions(),
                });
            }
            if frame.extent != first.extent {
                return Err(RadarError::ExtentMismatch(frame.source.clone()));
            }
        }
        Ok(())
    }

    /// Frames in trust order: listed sources first, then the rest as given.
    fn ordered<'a>(&self, frames: &'a [ReprojectedFrame]) -> Vec<&'a ReprojectedFrame> {
        let rank = |f: &ReprojectedFrame| {
            self.priority
                .iter()
                .position(|s| *s == f.source)
                .unwrap_or(self.priority.len())
        };

        let mut ordered: Vec<&ReprojectedFrame> = frames.iter().collect();
        // Stable sort keeps input order among unlisted sources
        ordered.sort_by_key(|f| rank(f));
        ordered
    }
}

fn merge_max(frames: &[&ReprojectedFrame]) -> Vec<f32> {
    let len = frames[0].data.len();
    (0..len)
        .into_par_iter()
        .map(|i| {
            frames
                .iter()
                .map(|f| f.data[i])
                .filter(|v| !v.is_nan())
                .fold(f32::NAN, |acc, v| if acc.is_nan() || v > acc { v } else { acc })
        })
        .collect()
}

fn merge_average(frames: &[&ReprojectedFrame]) -> Vec<f32> {
    let len = frames[0].data.len();
    (0..len)
        .into_par_iter()
        .map(|i| {
            let (sum, count) = frames
                .iter()
                .map(|f| f.data[i])
                .filter(|v| !v.is_nan())
                .fold((0.0f64, 0u32), |(sum, n), v| (sum + v as f64, n + 1));
            if count == 0 {
                f32::NAN
            } else {
                (sum / count as f64) as f32
            }
        })
        .collect()
}

fn merge_priority(frames: &[&ReprojectedFrame]) -> (Vec<f32>, Vec<(String, usize)>) {
    let len = frames[0].data.len();
    let mut out = vec![f32::NAN; len];
    let mut fill_counts = Vec::with_capacity(frames.len());

    for frame in frames {
        let mut filled = 0;
        for (dst, src) in out.iter_mut().zip(&frame.data) {
            if dst.is_nan() && !src.is_nan() {
                *dst = *src;
                filled += 1;
            }
        }
        fill_counts.push((frame.source.clone(), filled));
    }

    (out, fill_counts)
}
