use crate::decoder::SliceDecoder;
use crate::enums::SortBy;
use crate::inference::InferenceInvoker;
use crate::normalizer::{IntensityWindow, NormalizeError, normalize};
use crate::series_resolver::{ResolveError, SeriesResolver};
use crate::tensor::{LayoutError, TensorBuffer, to_tensor_layout};
use crate::volume::{NormalizedVolume, VolumeGeometry};
use crate::volume_assembler::{VolumeAssembler, VolumeAssemblerError};

use std::path::Path;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("series resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("volume assembly failed: {0}")]
    Assemble(#[from] VolumeAssemblerError),

    #[error("intensity normalization failed: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("tensor layout failed: {0}")]
    Layout(#[from] LayoutError),

    #[error("inference failed: {0}")]
    Inference(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PipelineOptions {
    pub sort_by: SortBy,
    pub window: IntensityWindow,
    /// Keep a copy of the normalized volume in [`PreparedInput`].
    pub keep_normalized: bool,
}

/// Everything the inference boundary needs, plus what was learned on the way.
#[derive(Debug, Clone)]
pub struct PreparedInput {
    pub series: String,
    pub geometry: VolumeGeometry,
    pub tensor: TensorBuffer,
    /// Only set with [`PipelineOptions::keep_normalized`].
    pub normalized: Option<NormalizedVolume>,
}

/// Directory to tensor: resolve, assemble, normalize, transpose.
pub struct Pipeline<'a, D: SliceDecoder> {
    decoder: &'a D,
    options: PipelineOptions,
}

impl<'a, D: SliceDecoder> Pipeline<'a, D> {
    pub fn new(decoder: &'a D, options: PipelineOptions) -> Self {
        Self { decoder, options }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// # Errors
    ///
    /// The first failing stage aborts the run; nothing partial is returned.
    #[instrument(skip(self, directory), fields(directory = %directory.as_ref().display()))]
    pub fn prepare(
        &self,
        directory: impl AsRef<Path>,
        selector: Option<&str>,
    ) -> Result<PreparedInput, PipelineError> {
        // Reject a bad window before any file is touched.
        self.options.window.validate()?;

        let series = SeriesResolver::new(self.decoder, self.options.sort_by)
            .resolve(directory, selector)?;
        info!(series = %series.identifier, slices = series.files.len(), "reading series");
        let series_id = series.identifier.clone();

        let volume = VolumeAssembler::new(self.decoder).assemble(series)?;
        let geometry = volume.geometry();
        log_geometry(&geometry);

        let normalized = normalize(volume, &self.options.window)?;
        let kept = self.options.keep_normalized.then(|| normalized.clone());
        let tensor = to_tensor_layout(normalized)?;
        info!(shape = ?tensor.shape(), "tensor shape");

        Ok(PreparedInput {
            series: series_id,
            geometry,
            tensor,
            normalized: kept,
        })
    }

    /// Prepare the input and hand a view of it to `invoker`.
    pub fn run<I: InferenceInvoker>(
        &self,
        directory: impl AsRef<Path>,
        selector: Option<&str>,
        invoker: &mut I,
    ) -> Result<(PreparedInput, I::Output), PipelineError> {
        let prepared = self.prepare(directory, selector)?;
        let output = invoker
            .invoke(prepared.tensor.view())
            .map_err(|e| PipelineError::Inference(Box::new(e)))?;
        info!("inference completed");
        Ok((prepared, output))
    }
}

fn log_geometry(geometry: &VolumeGeometry) {
    let [sx, sy, sz] = geometry.spacing;
    let [ox, oy, oz] = geometry.origin;
    info!(size = %geometry.size, "dims");
    info!("spacing: {sx}  {sy}  {sz}");
    info!("origin: {ox}  {oy}  {oz}");
    for row in &geometry.direction {
        info!("direction: {} {} {}", row[0], row[1], row[2]);
    }
}
