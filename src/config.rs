//! CLI surface for the demo reconstruction binary. The orchestrator itself
//! has no persisted configuration — its parameters are runtime state set
//! through `igsio_recon::orchestrator::PasteSliceIntoVolume`'s setters.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use once_cell::sync::Lazy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InterpolationArg {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CompoundingArg {
    Latest,
    Maximum,
    Mean,
    ImportanceMask,
}

#[derive(Debug, Parser)]
#[command(name = "igsio-recon", about = "Freehand 3D ultrasound volume reconstruction demo")]
pub struct Opt {
    /// Directory of input slice fixtures (raw samples + a sidecar
    /// transform per slice); see `demos/` for the expected layout.
    #[arg(short, long, value_parser)]
    pub input_dir: PathBuf,

    /// Where to write the reconstructed volume (raw samples).
    #[arg(short, long, value_parser)]
    pub output: PathBuf,

    #[arg(long, value_enum, default_value = "linear")]
    pub interpolation: InterpolationArg,

    #[arg(long, value_enum, default_value = "latest")]
    pub compounding: CompoundingArg,

    /// Worker thread count; 0 picks the hardware default.
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Log a single warning if any voxel's accumulation weight saturates.
    #[arg(long)]
    pub warn_on_acc_overflow: bool,
}

pub static OPTIONS: Lazy<Opt> = Lazy::new(Opt::parse);
