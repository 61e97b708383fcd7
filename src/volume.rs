use image::{GrayImage, ImageBuffer};
use ndarray::{Array3, ArrayView2, ArrayView3, s};
use rayon::prelude::*;
use std::fmt;

/// Extents of a volume along each physical axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VolumeSize {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl VolumeSize {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    /// Number of voxels.
    pub fn len(&self) -> usize {
        self.x * self.y * self.z
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Storage shape `(z, y, x)`; X varies fastest.
    pub fn storage_shape(&self) -> (usize, usize, usize) {
        (self.z, self.y, self.x)
    }
}

impl fmt::Display for VolumeSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {} x {}", self.x, self.y, self.z)
    }
}

/// Physical placement of a volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeGeometry {
    pub size: VolumeSize,
    /// Voxel spacing along x, y, z in millimetres.
    pub spacing: [f64; 3],
    /// Physical position of the first voxel.
    pub origin: [f64; 3],
    /// Direction cosines, row-major; column `j` is the direction of axis `j`.
    pub direction: [[f64; 3]; 3],
}

impl VolumeGeometry {
    pub const IDENTITY_DIRECTION: [[f64; 3]; 3] =
        [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    pub fn new(size: VolumeSize) -> Self {
        Self {
            size,
            spacing: [1.0; 3],
            origin: [0.0; 3],
            direction: Self::IDENTITY_DIRECTION,
        }
    }
}

/// Raw reconstructed scan volume.
#[derive(Debug, Clone)]
pub struct Volume {
    data: Array3<i16>,
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
    pub direction: [[f64; 3]; 3],
}

impl Volume {
    /// `data` is indexed `[z, y, x]`.
    pub fn new(
        data: Array3<i16>,
        spacing: [f64; 3],
        origin: [f64; 3],
        direction: [[f64; 3]; 3],
    ) -> Self {
        // Standard layout keeps the flat sample order X-fastest.
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().into_owned()
        };
        Self {
            data,
            spacing,
            origin,
            direction,
        }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn size(&self) -> VolumeSize {
        let (z, y, x) = self.dim();
        VolumeSize { x, y, z }
    }

    pub fn geometry(&self) -> VolumeGeometry {
        VolumeGeometry {
            size: self.size(),
            spacing: self.spacing,
            origin: self.origin,
            direction: self.direction,
        }
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<i16> {
        &self.data
    }

    /// Samples in storage order (X fastest, then Y, then Z).
    pub fn samples(&self) -> &[i16] {
        self.data
            .as_slice()
            .expect("volume data is kept in standard layout")
    }

    pub fn into_data(self) -> Array3<i16> {
        self.data
    }
}

/// Volume with intensities mapped into `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedVolume {
    samples: Vec<f32>,
    geometry: VolumeGeometry,
}

impl NormalizedVolume {
    /// Wrap a flat, X-fastest buffer. The length is not checked here; the
    /// layout transposer validates it against `geometry.size`.
    pub fn from_raw(samples: Vec<f32>, geometry: VolumeGeometry) -> Self {
        Self { samples, geometry }
    }

    pub fn size(&self) -> VolumeSize {
        self.geometry.size
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_parts(self) -> (Vec<f32>, VolumeGeometry) {
        (self.samples, self.geometry)
    }

    /// View as `[z, y, x]`, if the buffer length matches the reported size.
    pub fn view(&self) -> Option<ArrayView3<'_, f32>> {
        ArrayView3::from_shape(self.size().storage_shape(), &self.samples).ok()
    }

    /// Axial slice `z` rendered as an 8-bit grayscale image.
    pub fn axial_image(&self, z: usize) -> Option<GrayImage> {
        let view = self.view()?;
        if z >= self.size().z {
            return None;
        }
        Self::slice_to_image(&view.slice(s![z, .., ..]))
    }

    #[inline]
    fn to_u8(value: f32) -> u8 {
        (value * 255.0).round().clamp(0.0, 255.0) as u8
    }

    fn slice_to_image(slice: &ArrayView2<'_, f32>) -> Option<GrayImage> {
        let (height, width) = slice.dim();
        let pixel_data: Vec<u8> = slice
            .into_par_iter()
            .map(|&v| Self::to_u8(v))
            .collect();
        ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_follows_storage_axes() {
        let volume = Volume::new(
            Array3::zeros((5, 3, 2)),
            [1.0; 3],
            [0.0; 3],
            VolumeGeometry::IDENTITY_DIRECTION,
        );
        assert_eq!(volume.size(), VolumeSize::new(2, 3, 5));
        assert_eq!(volume.samples().len(), 30);
    }

    #[test]
    fn transposed_input_is_stored_x_fastest() {
        // (x, y, z) array reversed to (z, y, x) is not standard layout.
        let xyz = Array3::from_shape_fn((2, 1, 3), |(x, _, z)| (x + 10 * z) as i16);
        let zyx = xyz.reversed_axes();
        let volume = Volume::new(zyx, [1.0; 3], [0.0; 3], VolumeGeometry::IDENTITY_DIRECTION);
        assert_eq!(volume.samples(), &[0, 1, 10, 11, 20, 21]);
    }

    #[test]
    fn axial_image_scales_to_u8() {
        let geometry = VolumeGeometry::new(VolumeSize::new(2, 1, 2));
        let volume = NormalizedVolume::from_raw(vec![0.0, 1.0, 0.5, 0.25], geometry);
        let image = volume.axial_image(1).unwrap();
        assert_eq!(image.dimensions(), (2, 1));
        assert_eq!(image.as_raw(), &vec![128, 64]);
        assert!(volume.axial_image(2).is_none());
    }

    #[test]
    fn mismatched_buffer_has_no_view() {
        let geometry = VolumeGeometry::new(VolumeSize::new(2, 2, 2));
        let volume = NormalizedVolume::from_raw(vec![0.0; 7], geometry);
        assert!(volume.view().is_none());
    }
}
