use crate::decoder::{DecodeError, DecodedSlice, SliceDecoder, SliceHeader, cross, normalize};
use crate::series_resolver::SliceSeries;
use crate::volume::{Volume, VolumeGeometry};

use ndarray::Array3;
use rayon::prelude::*;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error)]
pub enum VolumeAssemblerError {
    #[error("Series {0} has no slice files")]
    EmptySeries(String),

    #[error("Failed to decode slice {}: {source}", .path.display())]
    SliceDecode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    #[error("Slice {} does not match the dimensions of the first slice", .path.display())]
    InconsistentDimensions { path: PathBuf },
}

/// Stacks the decoded slices of a series into one volume.
pub struct VolumeAssembler<'a, D: SliceDecoder> {
    decoder: &'a D,
}

impl<'a, D: SliceDecoder> VolumeAssembler<'a, D> {
    pub fn new(decoder: &'a D) -> Self {
        Self { decoder }
    }

    /// Decode every slice of `series` and stack them along Z in the given order.
    ///
    /// Slices are decoded in parallel; geometry is computed once all of them
    /// are in.
    ///
    /// # Errors
    ///
    /// Any slice that fails to decode aborts the whole assembly, as does a
    /// slice whose rows/columns differ from the first one.
    #[instrument(skip_all, fields(series = %series.identifier, slices = series.files.len()))]
    pub fn assemble(&self, series: SliceSeries) -> Result<Volume, VolumeAssemblerError> {
        if series.files.is_empty() {
            return Err(VolumeAssemblerError::EmptySeries(series.identifier));
        }

        let slices: Vec<DecodedSlice> = series
            .files
            .par_iter()
            .map(|path| {
                self.decoder
                    .decode(path)
                    .map_err(|source| VolumeAssemblerError::SliceDecode {
                        path: path.clone(),
                        source,
                    })
            })
            .collect::<Result<_, _>>()?;

        Self::validate_dimensions(&slices, &series.files)?;

        let data = Self::build_volume_array(&slices);
        let first = &slices[0].header;
        let last = &slices[slices.len() - 1].header;
        let slice_count = slices.len();

        let volume = Volume::new(
            data,
            Self::get_spacing(first, last, slice_count),
            first.image_position.unwrap_or([0.0; 3]),
            Self::get_direction(first, last, slice_count),
        );
        debug!(size = %volume.size(), "assembled volume");
        Ok(volume)
    }

    fn validate_dimensions(
        slices: &[DecodedSlice],
        files: &[PathBuf],
    ) -> Result<(), VolumeAssemblerError> {
        let first_dim = slices[0].samples.dim();
        match slices
            .iter()
            .zip(files)
            .find(|(slice, _)| slice.samples.dim() != first_dim)
        {
            Some((_, path)) => Err(VolumeAssemblerError::InconsistentDimensions {
                path: path.clone(),
            }),
            None => Ok(()),
        }
    }

    fn build_volume_array(slices: &[DecodedSlice]) -> Array3<i16> {
        let (height, width) = slices[0].samples.dim();
        let depth = slices.len();
        let mut volume = Array3::<i16>::zeros((depth, height, width));

        volume
            .outer_iter_mut()
            .into_par_iter()
            .zip(slices.par_iter())
            .for_each(|(mut plane, slice)| plane.assign(&slice.samples));

        volume
    }

    /// In-plane spacing from Pixel Spacing; slice spacing from the distance
    /// between the outermost slices, falling back to Slice Thickness.
    fn get_spacing(first: &SliceHeader, last: &SliceHeader, slice_count: usize) -> [f64; 3] {
        let [row_spacing, column_spacing] = first.pixel_spacing.unwrap_or_else(|| {
            warn!("missing pixel spacing, assuming 1.0");
            [1.0, 1.0]
        });

        let slice_spacing = Self::interslice_vector(first, last, slice_count)
            .map(|v| (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt())
            .filter(|spacing| *spacing > f64::EPSILON)
            .or(first.slice_thickness.filter(|t| *t > 0.0))
            .unwrap_or(1.0);

        [column_spacing, row_spacing, slice_spacing]
    }

    /// Columns are the row cosine, the column cosine and the slice direction.
    /// The slice direction follows the actual slice positions, so a tilted
    /// gantry yields a sheared (non-orthogonal) matrix.
    fn get_direction(first: &SliceHeader, last: &SliceHeader, slice_count: usize) -> [[f64; 3]; 3] {
        let Some(o) = first.image_orientation else {
            return VolumeGeometry::IDENTITY_DIRECTION;
        };
        let row = [o[0], o[1], o[2]];
        let column = [o[3], o[4], o[5]];
        let slice = Self::interslice_vector(first, last, slice_count)
            .and_then(normalize)
            .or_else(|| normalize(cross(row, column)))
            .unwrap_or([0.0, 0.0, 1.0]);

        std::array::from_fn(|i| [row[i], column[i], slice[i]])
    }

    fn interslice_vector(
        first: &SliceHeader,
        last: &SliceHeader,
        slice_count: usize,
    ) -> Option<[f64; 3]> {
        if slice_count < 2 {
            return None;
        }
        let (a, b) = (first.image_position?, last.image_position?);
        let steps = (slice_count - 1) as f64;
        Some([
            (b[0] - a[0]) / steps,
            (b[1] - a[1]) / steps,
            (b[2] - a[2]) / steps,
        ])
    }
}
