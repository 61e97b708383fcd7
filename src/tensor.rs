//! Tensor layout for the inference boundary.
//!
//! Volumes are stored `[z, y, x]` (X fastest). Models exported from the
//! training code take `[batch, channel, x, y, z]`, so the axes are reversed
//! and the result copied into a fresh contiguous buffer.

use crate::volume::{NormalizedVolume, VolumeGeometry};

use ndarray::{Array3, Array5, ArrayView5, Axis};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("Volume reports {expected} voxels but holds {actual} samples")]
    ShapeMismatch { expected: usize, actual: usize },
}

/// Borrowed input handed to an inference runtime.
pub type TensorView<'a> = ArrayView5<'a, f32>;

/// Owned, contiguous `[1, 1, X, Y, Z]` float tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorBuffer {
    data: Array5<f32>,
}

impl TensorBuffer {
    pub fn shape(&self) -> [usize; 5] {
        let mut shape = [0; 5];
        shape.copy_from_slice(self.data.shape());
        shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn view(&self) -> TensorView<'_> {
        self.data.view()
    }

    /// Elements in memory order (Z fastest).
    pub fn as_slice(&self) -> &[f32] {
        self.data
            .as_slice()
            .expect("tensor buffer is always in standard layout")
    }

    /// Native-endian bytes of [`Self::as_slice`], for raw export.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.as_slice())
    }

    pub fn into_array(self) -> Array5<f32> {
        self.data
    }
}

/// Reorder a normalized volume into `[1, 1, X, Y, Z]`.
///
/// # Errors
///
/// `ShapeMismatch` if the sample count disagrees with the reported size.
#[instrument(skip_all, fields(size = %volume.size()))]
pub fn to_tensor_layout(volume: NormalizedVolume) -> Result<TensorBuffer, LayoutError> {
    let (samples, VolumeGeometry { size, .. }) = volume.into_parts();
    let actual = samples.len();
    let zyx = Array3::from_shape_vec(size.storage_shape(), samples).map_err(|_| {
        LayoutError::ShapeMismatch {
            expected: size.len(),
            actual,
        }
    })?;
    let xyz = zyx.permuted_axes([2, 1, 0]).as_standard_layout().into_owned();
    let data = xyz.insert_axis(Axis(0)).insert_axis(Axis(0));

    debug!(shape = ?data.shape(), "tensor layout ready");
    Ok(TensorBuffer { data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::VolumeSize;
    use proptest::prelude::*;

    fn normalized(size: VolumeSize, samples: Vec<f32>) -> NormalizedVolume {
        NormalizedVolume::from_raw(samples, VolumeGeometry::new(size))
    }

    #[test]
    fn reverses_axes_and_adds_batch_channel() {
        let size = VolumeSize::new(3, 2, 4);
        let samples: Vec<f32> = (0..size.len()).map(|i| i as f32).collect();
        let tensor = to_tensor_layout(normalized(size, samples)).unwrap();

        assert_eq!(tensor.shape(), [1, 1, 3, 2, 4]);
        let view = tensor.view();
        for z in 0..4 {
            for y in 0..2 {
                for x in 0..3 {
                    let storage_index = x + 3 * (y + 2 * z);
                    assert_eq!(view[[0, 0, x, y, z]], storage_index as f32);
                }
            }
        }
        // Z is now the fastest axis in memory.
        assert_eq!(&tensor.as_slice()[..4], &[0.0, 6.0, 12.0, 18.0]);
    }

    #[test]
    fn short_buffer_is_shape_mismatch() {
        let error = to_tensor_layout(normalized(VolumeSize::new(2, 2, 2), vec![0.0; 6])).unwrap_err();
        assert_eq!(error, LayoutError::ShapeMismatch { expected: 8, actual: 6 });
    }

    #[test]
    fn bytes_cover_every_element() {
        let tensor = to_tensor_layout(normalized(VolumeSize::new(2, 1, 1), vec![0.0, 1.0])).unwrap();
        assert_eq!(tensor.as_bytes().len(), 8);
        assert_eq!(&tensor.as_bytes()[4..], &1.0f32.to_ne_bytes());
    }

    proptest! {
        #[test]
        fn element_count_and_shape(x in 1usize..6, y in 1usize..6, z in 1usize..6) {
            let size = VolumeSize::new(x, y, z);
            let samples: Vec<f32> = (0..size.len()).map(|i| i as f32 / size.len() as f32).collect();
            let mut sorted_in = samples.clone();
            let tensor = to_tensor_layout(normalized(size, samples)).unwrap();

            prop_assert_eq!(tensor.shape(), [1, 1, x, y, z]);
            prop_assert_eq!(tensor.len(), x * y * z);

            let mut sorted_out = tensor.as_slice().to_vec();
            sorted_in.sort_by(f32::total_cmp);
            sorted_out.sort_by(f32::total_cmp);
            prop_assert_eq!(sorted_in, sorted_out);
        }
    }
}
