//! C6: slice-paste orchestrator — the long-lived object a caller reuses
//! across many `insert_slice` calls, owning the output volume and its
//! accumulation buffer and fanning each paste out across worker threads.

use log::warn;
use rayon::prelude::*;

use crate::clip::{rect_clip_to_extent, FanClip, FanGeometry, RectClip};
use crate::error::ReconError;
use crate::geometry::{Extent, Mat4};
use crate::image::{Components, ImportanceMask, ScalarKind, Slice, ACCUMULATION_MULTIPLIER};
use crate::interp::{apply_contribution, CompoundingMode, Interpolation};
use crate::walker::{OptimizedWalker, PasteParams, UnoptimizedWalker, Walker};
use crate::{AccumulationBuffer, SampleBuffer};

/// How much of the optimized fast path to use. `None` always runs the
/// floating-point reference walker; useful for debugging and for the
/// oracle-comparison tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationLevel {
    Full,
    Partial,
    None,
    /// Dispatch to the `ocl`-backed walker. Only usable when this crate
    /// was built with the `gpu` feature; `insert_slice` fails fast with
    /// `ReconError::Resource` otherwise.
    Gpu,
}

/// A named convenience bundle of codec-facing encode settings. These
/// configure the (out-of-scope) downstream VP9 collaborator, not this
/// crate's reconstruction core; kept only as inert data for callers that
/// plumb a preset name through to that collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodePreset {
    pub lossless: bool,
    pub keyframe_min: u32,
    pub keyframe_max: u32,
    pub speed: Option<u8>,
    pub constant_quality: bool,
}

/// Resolve one of the three recognized preset names (§6). Returns `None`
/// for anything else; the caller decides whether an unknown name is an
/// error.
pub fn encode_preset(name: &str) -> Option<EncodePreset> {
    match name {
        "lossless" => Some(EncodePreset { lossless: true, keyframe_min: 10, keyframe_max: 50, speed: None, constant_quality: false }),
        "minimum-size-lossy" => {
            Some(EncodePreset { lossless: false, keyframe_min: 10, keyframe_max: 50, speed: None, constant_quality: false })
        }
        "constant-quality" => {
            Some(EncodePreset { lossless: false, keyframe_min: 0, keyframe_max: 0, speed: Some(8), constant_quality: true })
        }
        _ => None,
    }
}

/// The long-lived reconstruction engine. One instance owns one output
/// volume and accumulation buffer; `insert_slice` is called once per
/// input 2D slice.
pub struct PasteSliceIntoVolume {
    output_extent: Extent,
    output_origin: [f64; 3],
    output_spacing: [f64; 3],
    output_kind: ScalarKind,
    output_components: Components,

    interpolation: Interpolation,
    compounding: CompoundingMode,
    optimization: OptimizationLevel,

    rect_clip: Option<RectClip>,
    fan_clip: Option<FanClip>,
    pixel_reject_threshold: f64,

    thread_count: usize,
    warn_on_acc_overflow: bool,

    importance_mask: Option<ImportanceMask>,

    volume: Option<SampleBuffer>,
    accumulation: Option<AccumulationBuffer>,
}

impl PasteSliceIntoVolume {
    pub fn new(
        output_extent: Extent,
        output_origin: [f64; 3],
        output_spacing: [f64; 3],
        output_kind: ScalarKind,
        output_components: Components,
    ) -> Self {
        Self {
            output_extent,
            output_origin,
            output_spacing,
            output_kind,
            output_components,
            interpolation: Interpolation::Trilinear,
            compounding: CompoundingMode::Latest,
            optimization: OptimizationLevel::Full,
            rect_clip: None,
            fan_clip: None,
            pixel_reject_threshold: f64::MIN,
            thread_count: 0,
            warn_on_acc_overflow: false,
            importance_mask: None,
            volume: None,
            accumulation: None,
        }
    }

    pub fn set_output_extent(&mut self, extent: Extent) {
        self.output_extent = extent;
    }

    pub fn set_output_origin(&mut self, origin: [f64; 3]) {
        self.output_origin = origin;
    }

    pub fn set_output_spacing(&mut self, spacing: [f64; 3]) {
        self.output_spacing = spacing;
    }

    pub fn set_output_kind(&mut self, kind: ScalarKind) {
        self.output_kind = kind;
    }

    pub fn set_interpolation(&mut self, interpolation: Interpolation) {
        self.interpolation = interpolation;
    }

    pub fn set_compounding(&mut self, compounding: CompoundingMode) {
        self.compounding = compounding;
    }

    pub fn set_optimization(&mut self, optimization: OptimizationLevel) {
        self.optimization = optimization;
    }

    pub fn set_rect_clip(&mut self, clip: Option<RectClip>) {
        self.rect_clip = clip;
    }

    pub fn set_fan_clip(&mut self, fan: Option<FanClip>) {
        self.fan_clip = fan;
    }

    pub fn set_pixel_reject_threshold(&mut self, threshold: f64) {
        self.pixel_reject_threshold = threshold;
    }

    pub fn set_thread_count(&mut self, count: usize) {
        self.thread_count = count;
    }

    pub fn set_warn_on_acc_overflow(&mut self, warn: bool) {
        self.warn_on_acc_overflow = warn;
    }

    pub fn set_importance_mask(&mut self, mask: Option<ImportanceMask>) {
        self.importance_mask = mask;
    }

    pub fn volume(&self) -> Option<&SampleBuffer> {
        self.volume.as_ref()
    }

    pub fn accumulation(&self) -> Option<&AccumulationBuffer> {
        self.accumulation.as_ref()
    }

    /// Reallocate and zero both buffers at the current output extent,
    /// kind, spacing, and origin.
    pub fn reset(&mut self) -> Result<(), ReconError> {
        if self.output_extent.is_empty() {
            return Err(ReconError::config("output extent is empty"));
        }
        self.volume = Some(SampleBuffer::zeroed(self.output_extent, self.output_components, self.output_kind)?);
        self.accumulation = Some(AccumulationBuffer::zeroed(self.output_extent)?);
        Ok(())
    }

    fn resolve_thread_count(&self, extent_range: i64) -> usize {
        let hint = if self.thread_count == 0 {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            self.thread_count
        };
        hint.max(1).min(extent_range.max(1) as usize)
    }

    /// Split `extent` into `n` contiguous sub-extents along its widest
    /// axis (z preferred, then y, then x, as in §4.6).
    fn partition(extent: Extent, n: usize) -> Vec<Extent> {
        if n <= 1 {
            return vec![extent];
        }
        let axis = extent.widest_axis();
        let (lo, hi) = match axis {
            0 => (extent.x0, extent.x1),
            1 => (extent.y0, extent.y1),
            _ => (extent.z0, extent.z1),
        };
        let range = (hi - lo + 1) as usize;
        let n = n.min(range);
        let chunk = range / n;
        let remainder = range % n;

        let mut out = Vec::with_capacity(n);
        let mut cursor = lo;
        for i in 0..n {
            let this_len = chunk + if i < remainder { 1 } else { 0 };
            let start = cursor;
            let end = start + this_len as i32 - 1;
            cursor = end + 1;
            out.push(match axis {
                0 => Extent::new(start, end, extent.y0, extent.y1, extent.z0, extent.z1),
                1 => Extent::new(extent.x0, extent.x1, start, end, extent.z0, extent.z1),
                _ => Extent::new(extent.x0, extent.x1, extent.y0, extent.y1, start, end),
            });
        }
        out
    }

    /// Splat `slice` into the volume using `image_to_reference`, the
    /// transform from the slice's pixel-index frame to the output
    /// volume's reference frame. Returns `Ok(())` on success.
    pub fn insert_slice(&mut self, slice: &Slice, image_to_reference: &Mat4) -> Result<(), ReconError> {
        if self.output_extent.is_empty() {
            return Err(ReconError::config("output extent is empty"));
        }
        if self.optimization == OptimizationLevel::Gpu && cfg!(not(feature = "gpu")) {
            return Err(ReconError::resource("GPU backend not compiled in"));
        }
        if self.volume.is_none() || self.accumulation.is_none() {
            self.reset()?;
        }
        let slice_kind = slice.samples.kind;
        if slice_kind != self.output_kind {
            return Err(ReconError::config(format!(
                "slice scalar kind {:?} does not match output kind {:?}",
                slice_kind, self.output_kind
            )));
        }
        if let Some(mask) = &self.importance_mask {
            if !mask.matches_extent(&slice.extent()) {
                return Err(ReconError::config("importance mask extent does not match the slice extent"));
            }
        }

        let slice_extent = slice.extent();
        let clip_extent = match &self.rect_clip {
            Some(clip) => rect_clip_to_extent(clip, slice.origin, slice.spacing, slice_extent),
            None => slice_extent,
        };
        if clip_extent.is_empty() {
            return Ok(());
        }

        let fan_geometry = self.fan_clip.as_ref().map(|fan| FanGeometry::new(fan, slice.origin, slice.spacing));

        // pixel-index(slice) -> mm(slice) -> mm(reference) -> voxel-index(output)
        let slice_to_mm = Mat4::scale_translate(slice.spacing, slice.origin);
        let mm_to_output_index = Mat4::inverse_scale_translate(self.output_spacing, self.output_origin);
        let input_to_output = mm_to_output_index.mul(image_to_reference).mul(&slice_to_mm);

        let widest_range = match clip_extent.widest_axis() {
            0 => clip_extent.width(),
            1 => clip_extent.height(),
            _ => clip_extent.depth(),
        };
        let n_threads = self.resolve_thread_count(widest_range);
        let sub_extents = Self::partition(clip_extent, n_threads);

        let volume = self.volume.as_mut().expect("reset() guarantees allocation");
        let accumulation = self.accumulation.as_mut().expect("reset() guarantees allocation");

        let params = PasteParams {
            interpolation: self.interpolation,
            compounding: self.compounding,
            pixel_reject_threshold: self.pixel_reject_threshold,
            fan: fan_geometry.as_ref(),
            importance_mask: self.importance_mask.as_ref(),
        };
        let out_extent = self.output_extent;
        let slice_samples = &slice.samples;

        let total_overflow: u64 = if n_threads <= 1 {
            let walker = self.make_walker();
            let mut total = 0u64;
            for sub in &sub_extents {
                total += Self::run_one(walker.as_ref(), slice_samples, slice_extent, *sub, &input_to_output, &out_extent, &params, volume, accumulation);
            }
            total
        } else {
            let opt = self.optimization;
            // Each worker gets its own scratch volume/accumulation pair,
            // folded into the shared buffers after the join.
            let partials: Vec<(SampleBuffer, AccumulationBuffer, u64)> = sub_extents
                .par_iter()
                .map(|sub| {
                    let walker = Self::walker_for(opt);
                    let mut local_volume = volume.clone();
                    let mut local_accumulation = accumulation.clone();
                    let overflow = Self::run_one(
                        walker.as_ref(),
                        slice_samples,
                        slice_extent,
                        *sub,
                        &input_to_output,
                        &out_extent,
                        &params,
                        &mut local_volume,
                        &mut local_accumulation,
                    );
                    (local_volume, local_accumulation, overflow)
                })
                .collect();

            let mut total = 0u64;
            for (local_volume, local_accumulation, overflow) in partials {
                total += Self::merge_touched(volume, accumulation, &local_volume, &local_accumulation, self.compounding);
                total += overflow;
            }
            total
        };

        if self.warn_on_acc_overflow && total_overflow > 0 {
            warn!("accumulation buffer saturated at {total_overflow} voxel writes during this paste");
        }

        Ok(())
    }

    fn make_walker(&self) -> Box<dyn Walker + Send + Sync> {
        Self::walker_for(self.optimization)
    }

    fn walker_for(level: OptimizationLevel) -> Box<dyn Walker + Send + Sync> {
        match level {
            OptimizationLevel::Full | OptimizationLevel::Partial => Box::new(OptimizedWalker),
            OptimizationLevel::None => Box::new(UnoptimizedWalker),
            #[cfg(feature = "gpu")]
            OptimizationLevel::Gpu => match crate::gpu::GpuWalker::new() {
                Ok(gpu) => Box::new(gpu),
                Err(_) => Box::new(UnoptimizedWalker),
            },
            #[cfg(not(feature = "gpu"))]
            OptimizationLevel::Gpu => unreachable!("insert_slice rejects OptimizationLevel::Gpu without the gpu feature"),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_one(
        walker: &(dyn Walker + Send + Sync),
        slice_samples: &SampleBuffer,
        slice_extent: Extent,
        sub_clip_extent: Extent,
        input_to_output: &Mat4,
        out_extent: &Extent,
        params: &PasteParams,
        volume: &mut SampleBuffer,
        accumulation: &mut AccumulationBuffer,
    ) -> u64 {
        walker.paste(slice_samples, slice_extent, sub_clip_extent, input_to_output, out_extent, params, volume, accumulation)
    }

    /// Fold a worker's full-extent scratch buffers back into the shared
    /// ones, touching only voxels whose local accumulation is nonzero.
    /// Each touched voxel's local `(value, weight)` is recombined with
    /// whatever the shared buffer already holds there via the same
    /// compounding arithmetic `interp::apply_contribution` uses for any
    /// other contribution, so a voxel whose trilinear spread crosses two
    /// workers' sub-extents still ends up as the true combined weighted
    /// result instead of one worker's write clobbering the other's.
    /// Returns the number of voxels whose accumulation newly saturated
    /// during the merge.
    fn merge_touched(
        volume: &mut SampleBuffer,
        accumulation: &mut AccumulationBuffer,
        local_volume: &SampleBuffer,
        local_accumulation: &AccumulationBuffer,
        mode: CompoundingMode,
    ) -> u64 {
        let extent = accumulation.extent;
        let components = volume.components.count();
        let mut overflowed = 0u64;
        for z in extent.z0..=extent.z1 {
            for y in extent.y0..=extent.y1 {
                for x in extent.x0..=extent.x1 {
                    let local_acc = local_accumulation.get(x, y, z);
                    if local_acc == 0 {
                        continue;
                    }
                    let weight = local_acc as f64 / ACCUMULATION_MULTIPLIER;
                    for c in 0..components {
                        let value = local_volume.get(x, y, z, c);
                        if apply_contribution(volume, accumulation, mode, x, y, z, c, value, weight) {
                            overflowed += 1;
                        }
                    }
                }
            }
        }
        overflowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Extent;
    use crate::image::{Components, ScalarKind, SampleBuffer};

    fn make_slice(w: i32, h: i32) -> Slice {
        let extent = Extent::new(0, w - 1, 0, h - 1, 0, 0);
        let mut buf = SampleBuffer::zeroed(extent, Components::Mono, ScalarKind::U8).unwrap();
        for y in 0..h {
            for x in 0..w {
                buf.set(x, y, 0, 0, 200.0);
            }
        }
        Slice::new(buf, [1.0, 1.0, 1.0], [0.0, 0.0, 0.0])
    }

    #[test]
    fn reset_fails_on_empty_extent() {
        let mut orch = PasteSliceIntoVolume::new(
            Extent::empty_at(0, 0, 9, 0, 9),
            [0.0; 3],
            [1.0; 3],
            ScalarKind::U8,
            Components::Mono,
        );
        assert!(orch.reset().is_err());
    }

    #[test]
    fn insert_slice_populates_volume() {
        let mut orch = PasteSliceIntoVolume::new(
            Extent::new(0, 15, 0, 15, 0, 0),
            [0.0; 3],
            [1.0; 3],
            ScalarKind::U8,
            Components::Mono,
        );
        orch.set_thread_count(1);
        orch.set_interpolation(Interpolation::NearestNeighbor);
        orch.set_compounding(CompoundingMode::Latest);
        orch.reset().unwrap();
        let slice = make_slice(16, 16);
        orch.insert_slice(&slice, &Mat4::IDENTITY).unwrap();
        assert_eq!(orch.volume().unwrap().get(5, 5, 0, 0), 200.0);
        assert!(orch.accumulation().unwrap().get(5, 5, 0) > 0);
    }

    #[test]
    fn insert_slice_rejects_mismatched_kind() {
        let mut orch = PasteSliceIntoVolume::new(
            Extent::new(0, 15, 0, 15, 0, 0),
            [0.0; 3],
            [1.0; 3],
            ScalarKind::U16,
            Components::Mono,
        );
        orch.reset().unwrap();
        let slice = make_slice(16, 16);
        assert!(orch.insert_slice(&slice, &Mat4::IDENTITY).is_err());
    }

    #[test]
    fn presets_resolve_known_names_only() {
        assert!(encode_preset("lossless").unwrap().lossless);
        assert!(!encode_preset("minimum-size-lossy").unwrap().lossless);
        assert!(encode_preset("constant-quality").unwrap().constant_quality);
        assert!(encode_preset("nonsense").is_none());
    }

    #[test]
    fn merge_recombines_weighted_mean_across_worker_boundary() {
        // Two adjacent input columns (7 and 8) land in different halves of
        // the 2-way partition but, under a half-voxel x offset, trilinearly
        // spread into the same output voxel (x=8). The merged result must
        // be the true weighted mean of both contributions, not whichever
        // worker's local accumulation happened to be folded in last.
        let mut orch = PasteSliceIntoVolume::new(
            Extent::new(0, 15, 0, 5, 0, 1),
            [0.0, 0.0, 0.0],
            [1.0, 1.0, 1.0],
            ScalarKind::U8,
            Components::Mono,
        );
        orch.set_thread_count(2);
        orch.set_interpolation(Interpolation::Trilinear);
        orch.set_compounding(CompoundingMode::Mean);
        orch.reset().unwrap();

        let slice_extent = Extent::new(0, 15, 0, 3, 0, 0);
        let mut buf = SampleBuffer::zeroed(slice_extent, Components::Mono, ScalarKind::U8).unwrap();
        for y in 0..=3 {
            for x in 0..=15 {
                let v = if x == 7 { 100.0 } else if x == 8 { 200.0 } else { 0.0 };
                buf.set(x, y, 0, 0, v);
            }
        }
        let slice = Slice::new(buf, [1.0, 1.0, 1.0], [0.5, 0.0, 0.0]);

        orch.insert_slice(&slice, &Mat4::IDENTITY).unwrap();

        for y in 0..=3 {
            assert_eq!(orch.volume().unwrap().get(8, y, 0, 0), 150.0);
            assert_eq!(orch.accumulation().unwrap().get(8, y, 0), 256);
        }
    }

    #[test]
    fn partition_covers_extent_without_gaps_or_overlap() {
        let extent = Extent::new(0, 99, 0, 9, 0, 0);
        let parts = PasteSliceIntoVolume::partition(extent, 4);
        let mut covered = 0i64;
        for p in &parts {
            covered += p.width();
        }
        assert_eq!(covered, extent.width());
    }
}
