//! Demo CLI: reconstructs a volume from a directory of raw 2D slice
//! fixtures and writes the result as raw samples.
//!
//! Fixture layout: for each `slice_NNNN.raw` (row-major u8 samples) there
//! is a sidecar `slice_NNNN.meta` text file with one value per line:
//! `width height spacing_x spacing_y spacing_z origin_x origin_y origin_z`
//! followed by the 16 space-separated entries of the slice-to-reference
//! matrix, row-major.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use igsio_recon::{CompoundingMode, Components, Extent, Interpolation, Mat4, PasteSliceIntoVolume, SampleBuffer, ScalarKind, Slice};
use log::{error, info};

mod config;
mod logging;

use config::{CompoundingArg, InterpolationArg, OPTIONS};

type BoxError = Box<dyn Error>;

struct Fixture {
    slice: Slice,
    transform: Mat4,
}

fn load_fixture(raw_path: &Path) -> Result<Fixture, BoxError> {
    let meta_path = raw_path.with_extension("meta");
    let meta = fs::read_to_string(&meta_path)?;
    let mut tokens = meta.split_whitespace();

    let mut next_f64 = |label: &str| -> Result<f64, BoxError> {
        let raw = tokens.next().ok_or_else(|| format!("{meta_path:?}: missing {label}"))?;
        raw.parse::<f64>().map_err(|e| format!("{meta_path:?}: bad {label}: {e}").into())
    };

    let width = next_f64("width")? as i32;
    let height = next_f64("height")? as i32;
    let spacing = [next_f64("spacing_x")?, next_f64("spacing_y")?, next_f64("spacing_z")?];
    let origin = [next_f64("origin_x")?, next_f64("origin_y")?, next_f64("origin_z")?];

    let mut matrix = [[0.0f64; 4]; 4];
    for row in &mut matrix {
        for cell in row.iter_mut() {
            *cell = next_f64("matrix entry")?;
        }
    }

    let bytes = fs::read(raw_path)?;
    let extent = Extent::new(0, width - 1, 0, height - 1, 0, 0);
    let mut samples = SampleBuffer::zeroed(extent, Components::Mono, ScalarKind::U8)?;
    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) as usize;
            samples.set(x, y, 0, 0, *bytes.get(idx).unwrap_or(&0) as f64);
        }
    }

    Ok(Fixture { slice: Slice::new(samples, spacing, origin), transform: Mat4::from_rows(matrix) })
}

fn gather_fixtures(dir: &Path) -> Result<Vec<PathBuf>, BoxError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "raw"))
        .collect();
    paths.sort();
    Ok(paths)
}

fn run() -> Result<(), BoxError> {
    let fixtures = gather_fixtures(&OPTIONS.input_dir)?;
    if fixtures.is_empty() {
        return Err(format!("no .raw fixtures found in {:?}", OPTIONS.input_dir).into());
    }

    let first = load_fixture(&fixtures[0])?;
    let extent = first.slice.extent();

    let mut orch = PasteSliceIntoVolume::new(extent, [0.0; 3], [1.0, 1.0, 1.0], ScalarKind::U8, Components::Mono);
    orch.set_interpolation(match OPTIONS.interpolation {
        InterpolationArg::Nearest => Interpolation::NearestNeighbor,
        InterpolationArg::Linear => Interpolation::Trilinear,
    });
    orch.set_compounding(match OPTIONS.compounding {
        CompoundingArg::Latest => CompoundingMode::Latest,
        CompoundingArg::Maximum => CompoundingMode::Maximum,
        CompoundingArg::Mean => CompoundingMode::Mean,
        CompoundingArg::ImportanceMask => CompoundingMode::ImportanceMask,
    });
    orch.set_thread_count(OPTIONS.threads);
    orch.set_warn_on_acc_overflow(OPTIONS.warn_on_acc_overflow);
    orch.reset()?;

    info!("reconstructing {} slices into {:?}", fixtures.len(), extent);
    orch.insert_slice(&first.slice, &first.transform)?;
    for path in &fixtures[1..] {
        let fixture = load_fixture(path)?;
        orch.insert_slice(&fixture.slice, &fixture.transform)?;
    }

    let volume = orch.volume().expect("reset() was called above");
    let raw: Vec<u8> = volume.raw_slice().iter().map(|&v| v.clamp(0.0, 255.0) as u8).collect();
    fs::write(&OPTIONS.output, raw)?;
    info!("wrote reconstructed volume to {:?}", OPTIONS.output);
    Ok(())
}

fn main() {
    logging::init_logging();
    if let Err(e) = run() {
        error!("{e}");
        std::process::exit(1);
    }
}
