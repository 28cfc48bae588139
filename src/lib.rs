//! Freehand 3D volume reconstruction: splat a stream of 2D slices, each
//! carrying a slice-to-reference transform, into a shared voxel grid, and
//! a directed-graph transform repository for keeping those transforms
//! straight.

pub mod clip;
pub mod error;
pub mod geometry;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod image;
pub mod interp;
pub mod orchestrator;
pub mod transforms;
pub mod walker;

pub use clip::{FanClip, RectClip};
pub use error::{GraphError, ReconError};
pub use geometry::{Extent, Fixed, Mat4};
pub use image::{AccumulationBuffer, Components, ImportanceMask, SampleBuffer, ScalarKind, Slice, StridedImageView, Volume};
pub use interp::{CompoundingMode, Interpolation};
pub use orchestrator::{encode_preset, EncodePreset, OptimizationLevel, PasteSliceIntoVolume};
pub use transforms::{TransformRepository, TransformStatus};
