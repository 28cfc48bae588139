//! Data model: scalar kinds, the slice/volume/accumulation buffer shapes,
//! and the "strided image view" contract the core consumes instead of
//! depending on any particular image container library.

use crate::error::ReconError;
use crate::geometry::Extent;

/// Supported per-component scalar kinds. The input slice and output volume
/// must share the same kind; mixing fails with `ReconError::Config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl ScalarKind {
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    pub const fn min_value(self) -> f64 {
        match self {
            Self::I8 => i8::MIN as f64,
            Self::U8 => 0.0,
            Self::I16 => i16::MIN as f64,
            Self::U16 => 0.0,
            Self::I32 => i32::MIN as f64,
            Self::U32 => 0.0,
            Self::F32 | Self::F64 => f64::MIN,
        }
    }

    pub const fn max_value(self) -> f64 {
        match self {
            Self::I8 => i8::MAX as f64,
            Self::U8 => u8::MAX as f64,
            Self::I16 => i16::MAX as f64,
            Self::U16 => u16::MAX as f64,
            Self::I32 => i32::MAX as f64,
            Self::U32 => u32::MAX as f64,
            Self::F32 | Self::F64 => f64::MAX,
        }
    }
}

/// Number of components per pixel/voxel. Only monochrome (1) and RGB (3)
/// are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Components {
    Mono = 1,
    Rgb = 3,
}

impl Components {
    pub const fn count(self) -> usize {
        self as usize
    }
}

/// A contiguous, row-major (x fastest, then y, then z) buffer of `f64`
/// samples — the core's internal working representation. Callers provide
/// raw bytes in their own scalar kind via [`StridedImageView`]; the core
/// decodes/encodes at the boundary so the inner loops operate on a single
/// numeric type.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    pub extent: Extent,
    pub components: Components,
    pub kind: ScalarKind,
    data: Vec<f64>,
}

impl SampleBuffer {
    pub fn zeroed(extent: Extent, components: Components, kind: ScalarKind) -> Result<Self, ReconError> {
        let voxels = extent.voxel_count();
        if voxels <= 0 {
            return Err(ReconError::config("cannot allocate a buffer over an empty extent"));
        }
        let len = voxels as usize * components.count();
        let data = vec![0.0; len];
        Ok(Self { extent, components, kind, data })
    }

    #[inline]
    fn index(&self, x: i32, y: i32, z: i32) -> usize {
        let w = self.extent.width() as i64;
        let h = self.extent.height() as i64;
        let ix = (x as i64 - self.extent.x0 as i64)
            + (y as i64 - self.extent.y0 as i64) * w
            + (z as i64 - self.extent.z0 as i64) * w * h;
        ix as usize * self.components.count()
    }

    #[inline]
    pub fn get(&self, x: i32, y: i32, z: i32, c: usize) -> f64 {
        self.data[self.index(x, y, z) + c]
    }

    #[inline]
    pub fn set(&mut self, x: i32, y: i32, z: i32, c: usize, v: f64) {
        let idx = self.index(x, y, z) + c;
        self.data[idx] = v;
    }

    /// Clamp and, for integer kinds, round-to-nearest a raw value into this
    /// buffer's scalar kind range. Float kinds skip rounding (spec §4.3).
    pub fn clamp_to_kind(&self, v: f64) -> f64 {
        let v = v.clamp(self.kind.min_value(), self.kind.max_value());
        if self.kind.is_float() { v } else { crate::geometry::round_half_away_from_zero(v) }
    }

    pub fn raw_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn raw_slice_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }
}

/// A 16-bit-unsigned accumulation buffer, one component, same extent as the
/// volume it tracks. Saturation at 65535 is detected and counted, never
/// silently wrapped.
#[derive(Debug, Clone)]
pub struct AccumulationBuffer {
    pub extent: Extent,
    data: Vec<u16>,
}

pub const ACCUMULATION_MULTIPLIER: f64 = 256.0;
pub const ACCUMULATION_MAXIMUM: u16 = 65535;

impl AccumulationBuffer {
    pub fn zeroed(extent: Extent) -> Result<Self, ReconError> {
        let voxels = extent.voxel_count();
        if voxels <= 0 {
            return Err(ReconError::config("cannot allocate an accumulation buffer over an empty extent"));
        }
        Ok(Self { extent, data: vec![0; voxels as usize] })
    }

    #[inline]
    fn index(&self, x: i32, y: i32, z: i32) -> usize {
        let w = self.extent.width() as i64;
        let h = self.extent.height() as i64;
        ((x as i64 - self.extent.x0 as i64)
            + (y as i64 - self.extent.y0 as i64) * w
            + (z as i64 - self.extent.z0 as i64) * w * h) as usize
    }

    #[inline]
    pub fn get(&self, x: i32, y: i32, z: i32) -> u16 {
        self.data[self.index(x, y, z)]
    }

    /// Set the accumulation weight for one voxel to `new_weight_units` (in
    /// units of 1/256), clamping at saturation. Returns true if this write
    /// newly crossed into saturation (used to bump the per-thread overflow
    /// counter), matching the original's `ACCUMULATION_THRESHOLD` crossing
    /// check.
    #[inline]
    pub fn set_saturating(&mut self, x: i32, y: i32, z: i32, new_weight_units: f64) -> bool {
        let idx = self.index(x, y, z);
        let prev = self.data[idx];
        let saturated = new_weight_units > ACCUMULATION_MAXIMUM as f64;
        let overflowed = saturated && prev <= ACCUMULATION_MAXIMUM;
        self.data[idx] = if saturated {
            ACCUMULATION_MAXIMUM
        } else {
            crate::geometry::round_half_away_from_zero(new_weight_units) as u16
        };
        overflowed
    }

    pub fn raw_slice(&self) -> &[u16] {
        &self.data
    }
}

/// 2D input slice: pixel buffer plus extent/spacing/origin in the image
/// frame. Immutable during a paste; owned by the caller, borrowed
/// read-only per call.
#[derive(Debug, Clone)]
pub struct Slice {
    pub samples: SampleBuffer,
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
}

impl Slice {
    pub fn new(samples: SampleBuffer, spacing: [f64; 3], origin: [f64; 3]) -> Self {
        Self { samples, spacing, origin }
    }

    pub fn extent(&self) -> Extent {
        self.samples.extent
    }
}

/// 3D output volume: same shape concept as [`Slice`] but always has a
/// `z`-extent and is mutated only by the orchestrator.
#[derive(Debug, Clone)]
pub struct Volume {
    pub samples: SampleBuffer,
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
}

impl Volume {
    pub fn new(samples: SampleBuffer, spacing: [f64; 3], origin: [f64; 3]) -> Self {
        Self { samples, spacing, origin }
    }

    pub fn extent(&self) -> Extent {
        self.samples.extent
    }
}

/// Per-input-pixel importance weight (0..255), consulted only under
/// `CompoundingMode::ImportanceMask`.
#[derive(Debug, Clone)]
pub struct ImportanceMask {
    pub extent: Extent,
    data: Vec<u8>,
}

impl ImportanceMask {
    pub fn new(extent: Extent, data: Vec<u8>) -> Result<Self, ReconError> {
        let expected = extent.voxel_count();
        if expected <= 0 || data.len() as i64 != expected {
            return Err(ReconError::config("importance mask extent does not match its data length"));
        }
        Ok(Self { extent, data })
    }

    #[inline]
    pub fn get(&self, x: i32, y: i32) -> u8 {
        let w = self.extent.width();
        let ix = (x as i64 - self.extent.x0 as i64) + (y as i64 - self.extent.y0 as i64) * w;
        self.data[ix as usize]
    }

    pub fn matches_extent(&self, other: &Extent) -> bool {
        self.extent.x0 == other.x0
            && self.extent.x1 == other.x1
            && self.extent.y0 == other.y0
            && self.extent.y1 == other.y1
    }
}

/// A small contract for backing the slice/volume pixel storage with
/// whatever image container a caller prefers (contiguous strided buffer +
/// extent + spacing + origin + kind) without this crate depending on that
/// library directly.
pub trait StridedImageView {
    fn extent(&self) -> Extent;
    fn spacing(&self) -> [f64; 3];
    fn origin(&self) -> [f64; 3];
    fn kind(&self) -> ScalarKind;
    fn components(&self) -> Components;
    /// Row-major (x fastest, then y, then z) component-interleaved samples.
    fn samples(&self) -> &[f64];
}

impl StridedImageView for Slice {
    fn extent(&self) -> Extent {
        self.samples.extent
    }

    fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    fn origin(&self) -> [f64; 3] {
        self.origin
    }

    fn kind(&self) -> ScalarKind {
        self.samples.kind
    }

    fn components(&self) -> Components {
        self.samples.components
    }

    fn samples(&self) -> &[f64] {
        self.samples.raw_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_buffer_roundtrips() {
        let extent = Extent::new(0, 3, 0, 3, 0, 0);
        let mut buf = SampleBuffer::zeroed(extent, Components::Mono, ScalarKind::U8).unwrap();
        buf.set(1, 2, 0, 0, 42.0);
        assert_eq!(buf.get(1, 2, 0, 0), 42.0);
        assert_eq!(buf.get(0, 0, 0, 0), 0.0);
    }

    #[test]
    fn accumulation_saturates() {
        let extent = Extent::new(0, 1, 0, 1, 0, 0);
        let mut acc = AccumulationBuffer::zeroed(extent).unwrap();
        assert!(!acc.set_saturating(0, 0, 0, 60000.0));
        assert_eq!(acc.get(0, 0, 0), 60000);
        assert!(acc.set_saturating(0, 0, 0, 70000.0));
        assert_eq!(acc.get(0, 0, 0), ACCUMULATION_MAXIMUM);
    }

    #[test]
    fn importance_mask_rejects_mismatched_length() {
        let extent = Extent::new(0, 9, 0, 9, 0, 0);
        assert!(ImportanceMask::new(extent, vec![0u8; 5]).is_err());
    }
}
