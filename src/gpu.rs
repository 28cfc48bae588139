//! Optional OpenCL-backed scanline walker, mirroring the teacher's own
//! `ocl`-gated GPU downscaling path: same [`Walker`](crate::walker::Walker)
//! contract as the CPU implementations, compiled in only under the `gpu`
//! feature.

use ocl::{Buffer, ProQue};

use crate::clip::FanGeometry;
use crate::geometry::{Extent, Mat4};
use crate::image::{AccumulationBuffer, ImportanceMask, SampleBuffer};
use crate::interp::{CompoundingMode, Interpolation};
use crate::walker::{PasteParams, Walker};

/// GPU-backed walker. Currently supports nearest-neighbor/`Latest`
/// compounding only; anything else falls back to the CPU reference walker
/// so correctness never regresses when a kernel isn't implemented yet.
///
/// TODO: port the trilinear/mean-compounding kernel once the CPU path's
/// numerics have stabilized; see `benches/benchmarks.rs` for the
/// comparison harness this should plug into.
pub struct GpuWalker {
    pro_que: ProQue,
}

impl GpuWalker {
    pub fn new() -> ocl::Result<Self> {
        let pro_que = ProQue::builder().src(NEAREST_LATEST_KERNEL).dims(1).build()?;
        Ok(Self { pro_que })
    }

    fn supports(&self, params: &PasteParams) -> bool {
        matches!(params.interpolation, Interpolation::NearestNeighbor) && matches!(params.compounding, CompoundingMode::Latest)
            && params.fan.map(FanGeometry::is_enabled) != Some(true)
    }
}

const NEAREST_LATEST_KERNEL: &str = r#"
__kernel void nearest_latest(
    __global const uchar* input,
    __global uchar* volume,
    __global ushort* accumulation,
    int in_w, int out_w, int out_h, int out_d,
    double m00, double m01, double m02, double m03,
    double m10, double m11, double m12, double m13,
    double m20, double m21, double m22, double m23
) {
    int x = get_global_id(0);
    int y = get_global_id(1);
    double px = (double)x;
    double py = (double)y;
    double ox = m00 * px + m01 * py + m03;
    double oy = m10 * px + m11 * py + m13;
    double oz = m20 * px + m21 * py + m23;
    int ix = (int) round(ox);
    int iy = (int) round(oy);
    int iz = (int) round(oz);
    if (ix < 0 || ix >= out_w || iy < 0 || iy >= out_h || iz < 0 || iz >= out_d) {
        return;
    }
    long idx = (long)iz * out_w * out_h + (long)iy * out_w + ix;
    volume[idx] = input[y * in_w + x];
    accumulation[idx] = 256;
}
"#;

impl Walker for GpuWalker {
    fn paste(
        &self,
        slice_samples: &SampleBuffer,
        slice_extent: Extent,
        clip_extent: Extent,
        input_to_output: &Mat4,
        out_extent: &Extent,
        params: &PasteParams,
        volume: &mut SampleBuffer,
        accumulation: &mut AccumulationBuffer,
    ) -> u64 {
        if !self.supports(params) {
            return crate::walker::UnoptimizedWalker
                .paste(slice_samples, slice_extent, clip_extent, input_to_output, out_extent, params, volume, accumulation);
        }

        let run = || -> ocl::Result<()> {
            let in_w = slice_extent.width() as i32;
            let out_w = out_extent.width() as i32;
            let out_h = out_extent.height() as i32;
            let out_d = out_extent.depth() as i32;

            let input_bytes: Vec<u8> = slice_samples.raw_slice().iter().map(|&v| v as u8).collect();
            let volume_bytes: Vec<u8> = volume.raw_slice().iter().map(|&v| v as u8).collect();
            let accumulation_units: Vec<u16> = accumulation.raw_slice().to_vec();

            let input_buf = Buffer::<u8>::builder().queue(self.pro_que.queue().clone()).len(input_bytes.len()).copy_host_slice(&input_bytes).build()?;
            let volume_buf =
                Buffer::<u8>::builder().queue(self.pro_que.queue().clone()).len(volume_bytes.len()).copy_host_slice(&volume_bytes).build()?;
            let accumulation_buf = Buffer::<u16>::builder()
                .queue(self.pro_que.queue().clone())
                .len(accumulation_units.len())
                .copy_host_slice(&accumulation_units)
                .build()?;

            let m = &input_to_output.m;
            let kernel = self
                .pro_que
                .kernel_builder("nearest_latest")
                .arg(&input_buf)
                .arg(&volume_buf)
                .arg(&accumulation_buf)
                .arg(in_w)
                .arg(out_w)
                .arg(out_h)
                .arg(out_d)
                .arg(m[0][0])
                .arg(m[0][1])
                .arg(m[0][2])
                .arg(m[0][3])
                .arg(m[1][0])
                .arg(m[1][1])
                .arg(m[1][2])
                .arg(m[1][3])
                .arg(m[2][0])
                .arg(m[2][1])
                .arg(m[2][2])
                .arg(m[2][3])
                .global_work_size([clip_extent.width() as usize, clip_extent.height() as usize])
                .build()?;
            unsafe {
                kernel.enq()?;
            }

            let mut volume_out = vec![0u8; volume_bytes.len()];
            volume_buf.read(&mut volume_out).enq()?;
            let mut accumulation_out = vec![0u16; accumulation_units.len()];
            accumulation_buf.read(&mut accumulation_out).enq()?;

            for (i, &v) in volume_out.iter().enumerate() {
                volume.raw_slice_mut()[i] = v as f64;
            }
            // Nearest/Latest can never saturate the accumulation buffer
            // (every touched voxel gets exactly one 256-unit weight), so
            // the readback is a plain copy rather than a saturating set.
            let w = out_extent.width();
            let h = out_extent.height();
            for (flat, &units) in accumulation_out.iter().enumerate() {
                if units == 0 {
                    continue;
                }
                let flat = flat as i64;
                let x = out_extent.x0 + (flat % w) as i32;
                let y = out_extent.y0 + ((flat / w) % h) as i32;
                let z = out_extent.z0 + (flat / (w * h)) as i32;
                accumulation.set_saturating(x, y, z, units as f64);
            }
            Ok(())
        };

        match run() {
            Ok(()) => 0,
            Err(_) => crate::walker::UnoptimizedWalker
                .paste(slice_samples, slice_extent, clip_extent, input_to_output, out_extent, params, volume, accumulation),
        }
    }
}

#[cfg(all(test, feature = "gpu"))]
mod tests {
    use super::*;

    #[test]
    fn falls_back_for_unsupported_modes() {
        let Ok(gpu) = GpuWalker::new() else { return };
        let params = PasteParams {
            interpolation: Interpolation::Trilinear,
            compounding: CompoundingMode::Mean,
            pixel_reject_threshold: f64::MIN,
            fan: None,
            importance_mask: None::<&ImportanceMask>,
        };
        assert!(!gpu.supports(&params));
    }
}
