//! # DICOM-tensor library
//!
//! This crate turns a directory of DICOM slices into the input tensor of a
//! volumetric segmentation model.
//!
//! It builds on the dicom-rs ecosystem and runs in four stages, each taking
//! ownership of the previous stage's output:
//!  - Series resolution: slice files are grouped by Series Instance UID
//!    (restricted by Series Date) and ordered along the slice normal
//!  - Volume assembly: slices are decoded in parallel using rayon and stacked
//!    into one signed 16 bit volume with spacing, origin and direction cosines
//!  - Intensity normalization: samples are windowed into `[0, 1]`
//!    (CT defaults: -1024 to 300 HU, NaN read as -2000)
//!  - Tensor layout: axes are reordered to `[1, 1, X, Y, Z]` in a new
//!    contiguous buffer
//!
//!  The prepared tensor is handed to an [`InferenceInvoker`]. With the `onnx`
//!  feature an ONNX Runtime invoker is available.
//!
//!  DICOM files are assumed to have the following attributes:
//!   - No multiframe (always the first frame is used)
//!   - Rescale slope/intercept map stored values to the modality unit
//!
//! # Examples
//!
//! ## Preparing model input from a directory
//!
//! ```no_run
//! # use dicom_tensor::{DicomSliceDecoder, Pipeline, PipelineOptions};
//! let decoder = DicomSliceDecoder;
//! let prepared = Pipeline::new(&decoder, PipelineOptions::default())
//!     .prepare("dicom", None)
//!     .expect("should have prepared a tensor from the directory");
//! let [_, _, x, y, z] = prepared.tensor.shape();
//! println!("{x} x {y} x {z} voxels, spacing {:?}", prepared.geometry.spacing);
//! ```
//!
//! [`InferenceInvoker`]: crate::inference::InferenceInvoker

pub mod decoder;
pub mod enums;
pub mod inference;
pub mod logging;
pub mod normalizer;
pub mod pipeline;
pub mod series_resolver;
pub mod tensor;
pub mod volume;
pub mod volume_assembler;

pub use decoder::{DicomSliceDecoder, SliceDecoder};
pub use pipeline::{Pipeline, PipelineError, PipelineOptions, PreparedInput};
