//! C3: interpolation kernels — nearest-neighbor and trilinear splatting of
//! one input pixel into the output volume under a chosen compounding rule.

use crate::geometry::{round_half_away_from_zero, Extent};
use crate::image::{AccumulationBuffer, SampleBuffer, ACCUMULATION_MULTIPLIER};

/// How a single weighted contribution `(value, weight)` updates a voxel
/// and its accumulation cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundingMode {
    /// Last write wins (`weight >= 1/8` threshold applies under
    /// trilinear).
    Latest,
    /// Keep the maximum value seen per component (same threshold).
    Maximum,
    /// Running weighted average.
    Mean,
    /// Like `Mean`, but the weight is additionally scaled by a per-pixel
    /// importance mask value.
    ImportanceMask,
}

/// Interpolation kernel selected once per paste.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    NearestNeighbor,
    Trilinear,
}

/// Minimum trilinear corner weight under `Maximum`/`Latest` compounding,
/// below which the corner is left untouched (spec §4.3).
pub const MIN_TRILINEAR_WEIGHT: f64 = 0.125;

/// Apply one `(value, weight)` pair at one output voxel/component under
/// the given compounding mode. `importance` is only read for
/// `CompoundingMode::ImportanceMask` (weight 0 there is a no-op, matching
/// the original's `break` semantics).
///
/// Returns `true` if this write caused the accumulation buffer to newly
/// saturate at this voxel (used to bump the caller's overflow counter).
#[inline]
#[allow(clippy::too_many_arguments)]
pub fn apply_contribution(
    volume: &mut SampleBuffer,
    accumulation: &mut AccumulationBuffer,
    mode: CompoundingMode,
    x: i32,
    y: i32,
    z: i32,
    c: usize,
    value: f64,
    weight: f64,
) -> bool {
    if weight <= 0.0 {
        return false;
    }
    let round_output = !volume.kind.is_float();
    let cur = volume.get(x, y, z, c);
    let acc_units = accumulation.get(x, y, z) as f64;

    let (new_value, new_acc_units) = match mode {
        CompoundingMode::Latest => {
            if weight >= MIN_TRILINEAR_WEIGHT {
                (value, weight * ACCUMULATION_MULTIPLIER)
            } else {
                return false;
            }
        }
        CompoundingMode::Maximum => {
            if weight >= MIN_TRILINEAR_WEIGHT && value > cur {
                (value, weight * ACCUMULATION_MULTIPLIER)
            } else {
                return false;
            }
        }
        CompoundingMode::Mean | CompoundingMode::ImportanceMask => {
            let r = acc_units / ACCUMULATION_MULTIPLIER;
            let a = weight + r;
            let v = (weight * value + r * cur) / a;
            (v, a * ACCUMULATION_MULTIPLIER)
        }
    };

    let v = if round_output { round_half_away_from_zero(new_value) } else { new_value };
    volume.set(x, y, z, c, volume.clamp_to_kind(v));
    accumulation.set_saturating(x, y, z, new_acc_units)
}

/// Nearest-neighbor splat: round the transformed output coordinates,
/// bounds-check once, then apply every component under the compounding
/// rule. No-op if outside the output extent.
#[inline]
#[allow(clippy::too_many_arguments)]
pub fn nearest_neighbor_splat(
    volume: &mut SampleBuffer,
    accumulation: &mut AccumulationBuffer,
    extent: &Extent,
    mode: CompoundingMode,
    out_coord: [f64; 3],
    input: &[f64],
    importance: Option<u8>,
) -> bool {
    let i = round_half_away_from_zero(out_coord[0]) as i32;
    let j = round_half_away_from_zero(out_coord[1]) as i32;
    let k = round_half_away_from_zero(out_coord[2]) as i32;
    if !extent.contains(i, j, k) {
        return false;
    }

    let mask_weight = match (mode, importance) {
        (CompoundingMode::ImportanceMask, Some(m)) => m as f64 / 255.0,
        (CompoundingMode::ImportanceMask, None) => 0.0,
        _ => 1.0,
    };
    if mask_weight <= 0.0 {
        return false;
    }

    let mut overflowed = false;
    for (c, &value) in input.iter().enumerate() {
        if apply_contribution(volume, accumulation, mode, i, j, k, c, value, mask_weight) {
            overflowed = true;
        }
    }
    overflowed
}

/// Trilinear splat: 8 corners around `floor(out_coord)`, weighted by the
/// fractional distance on each axis. The whole 8-voxel update is skipped
/// if any corner's index falls outside the output extent (bounds checked
/// once, aggregate).
#[inline]
#[allow(clippy::too_many_arguments)]
pub fn trilinear_splat(
    volume: &mut SampleBuffer,
    accumulation: &mut AccumulationBuffer,
    extent: &Extent,
    mode: CompoundingMode,
    out_coord: [f64; 3],
    input: &[f64],
    importance: Option<u8>,
) -> bool {
    let i = out_coord[0].floor() as i32;
    let j = out_coord[1].floor() as i32;
    let k = out_coord[2].floor() as i32;
    if !extent.contains(i, j, k) || !extent.contains(i + 1, j + 1, k + 1) {
        return false;
    }

    let fx = out_coord[0] - i as f64;
    let fy = out_coord[1] - j as f64;
    let fz = out_coord[2] - k as f64;
    let rx = 1.0 - fx;
    let ry = 1.0 - fy;
    let rz = 1.0 - fz;

    let mask_weight = match (mode, importance) {
        (CompoundingMode::ImportanceMask, Some(m)) => m as f64 / 255.0,
        (CompoundingMode::ImportanceMask, None) => 0.0,
        _ => 1.0,
    };
    if mask_weight <= 0.0 {
        return false;
    }

    // Corner order: (dx,dy,dz) bit pattern, matching the original's fdx[0..8].
    let corners: [(i32, i32, i32, f64); 8] = [
        (0, 0, 0, rx * ry * rz),
        (0, 0, 1, rx * ry * fz),
        (0, 1, 0, rx * fy * rz),
        (0, 1, 1, rx * fy * fz),
        (1, 0, 0, fx * ry * rz),
        (1, 0, 1, fx * ry * fz),
        (1, 1, 0, fx * fy * rz),
        (1, 1, 1, fx * fy * fz),
    ];

    let threshold_applies = matches!(mode, CompoundingMode::Maximum | CompoundingMode::Latest);

    let mut overflowed = false;
    for (dx, dy, dz, w) in corners {
        if w == 0.0 {
            continue;
        }
        if threshold_applies && w < MIN_TRILINEAR_WEIGHT {
            continue;
        }
        let weight = w * mask_weight;
        let (cx, cy, cz) = (i + dx, j + dy, k + dz);
        for (c, &value) in input.iter().enumerate() {
            if apply_contribution(volume, accumulation, mode, cx, cy, cz, c, value, weight) {
                overflowed = true;
            }
        }
    }
    overflowed
}

/// Pixel rejection: skip this input pixel entirely if
/// `sum(components) < threshold * num_components`. `threshold` uses the
/// sentinel `f64::MIN` to mean "disabled".
#[inline]
pub fn pixel_rejected(input: &[f64], threshold: f64) -> bool {
    if threshold <= f64::MIN {
        return false;
    }
    let sum: f64 = input.iter().sum();
    sum < threshold * input.len() as f64
}
