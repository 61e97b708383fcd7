//! Slice decoding collaborator.
//!
//! The pipeline never touches pixel data encodings directly: it asks a
//! [`SliceDecoder`] for a slice's header (cheap, used for grouping and
//! ordering) or for the full decoded plane. [`DicomSliceDecoder`] is the
//! implementation backed by dicom-rs.

use dicom::object::{DefaultDicomObject, OpenFileOptions, open_file};
use dicom::pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption};
use dicom_dictionary_std::tags;
use ndarray::{Array2, s};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error("Missing required attribute {0}")]
    MissingAttribute(&'static str),

    #[error("Pixel data could not be decoded: {0}")]
    PixelData(String),
}

/// Header attributes needed to group, order and place a slice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliceHeader {
    pub series_instance_uid: String,
    pub series_date: Option<String>,
    pub series_description: Option<String>,
    pub modality: Option<String>,
    pub instance_number: Option<i32>,
    pub image_position: Option<[f64; 3]>,
    pub image_orientation: Option<[f64; 6]>,
    /// Row spacing, column spacing (DICOM Pixel Spacing order).
    pub pixel_spacing: Option<[f64; 2]>,
    pub slice_thickness: Option<f64>,
    /// Rescale Slope, identity when absent.
    pub rescale_slope: Option<f64>,
    /// Rescale Intercept, zero when absent.
    pub rescale_intercept: Option<f64>,
    pub rows: u32,
    pub columns: u32,
}

impl SliceHeader {
    /// Unit normal of the image plane (`row × column`).
    pub fn slice_normal(&self) -> Option<[f64; 3]> {
        let o = self.image_orientation?;
        let normal = cross([o[0], o[1], o[2]], [o[3], o[4], o[5]]);
        normalize(normal)
    }
}

/// One decoded 2D plane with its header. `samples` has shape `(rows, columns)`.
#[derive(Debug, Clone)]
pub struct DecodedSlice {
    pub header: SliceHeader,
    pub samples: Array2<i16>,
}

pub trait SliceDecoder: Sync {
    /// Read header attributes only; non-slice files must return an error.
    fn read_header(&self, path: &Path) -> Result<SliceHeader, DecodeError>;

    /// Decode the first frame of the slice into signed samples.
    fn decode(&self, path: &Path) -> Result<DecodedSlice, DecodeError>;
}

/// dicom-rs backed decoder. Rescale slope/intercept is applied so samples are
/// in the modality's signed unit (Hounsfield units for CT); VOI windowing is not.
#[derive(Debug, Default, Clone, Copy)]
pub struct DicomSliceDecoder;

impl SliceDecoder for DicomSliceDecoder {
    fn read_header(&self, path: &Path) -> Result<SliceHeader, DecodeError> {
        let dicom_object = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)?;
        Self::extract_header(&dicom_object)
    }

    fn decode(&self, path: &Path) -> Result<DecodedSlice, DecodeError> {
        let dicom_object = open_file(path)?;
        let header = Self::extract_header(&dicom_object)?;
        let samples = Self::decode_image(&dicom_object, &header)?;
        Ok(DecodedSlice { header, samples })
    }
}

impl DicomSliceDecoder {
    fn extract_header(dicom_object: &DefaultDicomObject) -> Result<SliceHeader, DecodeError> {
        let series_instance_uid = Self::get_string(dicom_object, tags::SERIES_INSTANCE_UID)
            .ok_or(DecodeError::MissingAttribute("SeriesInstanceUID"))?;
        let rows = Self::get_u32(dicom_object, tags::ROWS)
            .ok_or(DecodeError::MissingAttribute("Rows"))?;
        let columns = Self::get_u32(dicom_object, tags::COLUMNS)
            .ok_or(DecodeError::MissingAttribute("Columns"))?;

        Ok(SliceHeader {
            series_instance_uid,
            series_date: Self::get_string(dicom_object, tags::SERIES_DATE),
            series_description: Self::get_string(dicom_object, tags::SERIES_DESCRIPTION),
            modality: Self::get_string(dicom_object, tags::MODALITY),
            instance_number: dicom_object
                .element(tags::INSTANCE_NUMBER)
                .ok()
                .and_then(|e| e.to_int::<i32>().ok()),
            image_position: Self::get_floats(dicom_object, tags::IMAGE_POSITION_PATIENT)
                .and_then(|v| v.try_into().ok()),
            image_orientation: Self::get_floats(dicom_object, tags::IMAGE_ORIENTATION_PATIENT)
                .and_then(|v| v.try_into().ok()),
            pixel_spacing: Self::get_floats(dicom_object, tags::PIXEL_SPACING)
                .and_then(|v| v.try_into().ok()),
            slice_thickness: Self::get_float(dicom_object, tags::SLICE_THICKNESS),
            rescale_slope: Self::get_float(dicom_object, tags::RESCALE_SLOPE),
            rescale_intercept: Self::get_float(dicom_object, tags::RESCALE_INTERCEPT),
            rows,
            columns,
        })
    }

    /// Stored values are read without a LUT; slope and intercept are applied
    /// here and the result saturates into `i16`.
    fn decode_image(
        dicom_object: &DefaultDicomObject,
        header: &SliceHeader,
    ) -> Result<Array2<i16>, DecodeError> {
        let pixel_data = dicom_object
            .decode_pixel_data()
            .map_err(|e| DecodeError::PixelData(e.to_string()))?;
        let options = ConvertOptions::new()
            .with_modality_lut(ModalityLutOption::None)
            .with_voi_lut(VoiLutOption::Identity);
        let stored = pixel_data
            .to_ndarray_with_options::<f32>(&options)
            .map_err(|e| DecodeError::PixelData(e.to_string()))?
            .slice_move(s![0, .., .., 0]);

        let slope = header.rescale_slope.unwrap_or(1.0);
        let intercept = header.rescale_intercept.unwrap_or(0.0);
        Ok(stored.mapv(|value| rescale(value, slope, intercept)))
    }

    fn get_string(dicom_object: &DefaultDicomObject, tag: dicom::core::Tag) -> Option<String> {
        let value = dicom_object.element(tag).ok()?.to_str().ok()?;
        let trimmed = value.trim_end_matches(['\0', ' ']).trim_start();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    fn get_u32(dicom_object: &DefaultDicomObject, tag: dicom::core::Tag) -> Option<u32> {
        dicom_object.element(tag).ok()?.to_int::<u32>().ok()
    }

    fn get_float(dicom_object: &DefaultDicomObject, tag: dicom::core::Tag) -> Option<f64> {
        dicom_object.element(tag).ok()?.to_float64().ok()
    }

    fn get_floats(dicom_object: &DefaultDicomObject, tag: dicom::core::Tag) -> Option<Vec<f64>> {
        dicom_object.element(tag).ok()?.to_multi_float64().ok()
    }
}

/// Apply `stored * slope + intercept`, rounded and saturated into `i16`.
fn rescale(stored: f32, slope: f64, intercept: f64) -> i16 {
    let value = (f64::from(stored) * slope + intercept).round();
    value.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}

pub(crate) fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub(crate) fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Scale to unit length; `None` for a (near) zero vector.
pub(crate) fn normalize(v: [f64; 3]) -> Option<[f64; 3]> {
    let norm = dot(v, v).sqrt();
    (norm > f64::EPSILON).then(|| [v[0] / norm, v[1] / norm, v[2] / norm])
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom::core::{DataElement, PrimitiveValue, VR};
    use dicom::object::mem::InMemElement;
    use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
    use dicom::transfer_syntax::entries::EXPLICIT_VR_LITTLE_ENDIAN;

    const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";

    /// Writes a 2x3 CT slice with intercept -1024. `stored` holds the raw
    /// 16 bit words, so signed values are passed in two's complement.
    fn write_ct_slice(path: &Path, bits_stored: u16, signed: bool, stored: [u16; 6]) {
        let pixel_bytes: Vec<u8> = stored.iter().flat_map(|word| word.to_le_bytes()).collect();
        let element =
            |tag, vr, value: PrimitiveValue| -> InMemElement { DataElement::new(tag, vr, value) };
        let object = InMemDicomObject::from_element_iter([
            element(tags::SOP_CLASS_UID, VR::UI, CT_IMAGE_STORAGE.into()),
            element(tags::SOP_INSTANCE_UID, VR::UI, "2.25.1001".into()),
            element(tags::MODALITY, VR::CS, "CT".into()),
            element(tags::SERIES_DATE, VR::DA, "20240101".into()),
            element(tags::SERIES_INSTANCE_UID, VR::UI, "2.25.77".into()),
            element(tags::INSTANCE_NUMBER, VR::IS, "7".into()),
            element(tags::SLICE_THICKNESS, VR::DS, "2.5".into()),
            element(tags::IMAGE_POSITION_PATIENT, VR::DS, "-120.5\\-80\\42.25".into()),
            element(tags::IMAGE_ORIENTATION_PATIENT, VR::DS, "1\\0\\0\\0\\1\\0".into()),
            element(tags::SAMPLES_PER_PIXEL, VR::US, 1u16.into()),
            element(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2".into()),
            element(tags::ROWS, VR::US, 2u16.into()),
            element(tags::COLUMNS, VR::US, 3u16.into()),
            element(tags::PIXEL_SPACING, VR::DS, "0.5\\0.75".into()),
            element(tags::BITS_ALLOCATED, VR::US, 16u16.into()),
            element(tags::BITS_STORED, VR::US, bits_stored.into()),
            element(tags::HIGH_BIT, VR::US, (bits_stored - 1).into()),
            element(tags::PIXEL_REPRESENTATION, VR::US, u16::from(signed).into()),
            element(tags::RESCALE_INTERCEPT, VR::DS, "-1024".into()),
            element(tags::RESCALE_SLOPE, VR::DS, "1".into()),
            element(tags::PIXEL_DATA, VR::OW, pixel_bytes.into()),
        ]);
        let meta = FileMetaTableBuilder::new()
            .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN.uid())
            .media_storage_sop_class_uid(CT_IMAGE_STORAGE)
            .media_storage_sop_instance_uid("2.25.1001");
        object
            .with_meta(meta)
            .unwrap()
            .write_to_file(path)
            .unwrap();
    }

    fn decode_ct(bits_stored: u16, signed: bool, stored: [u16; 6]) -> DecodedSlice {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ct.dcm");
        write_ct_slice(&path, bits_stored, signed, stored);
        DicomSliceDecoder.decode(&path).unwrap()
    }

    fn hounsfield(slice: &DecodedSlice) -> Vec<i16> {
        slice.samples.iter().copied().collect()
    }

    #[test]
    fn unsigned_16_bit_ct_is_rescaled_to_hounsfield() {
        let slice = decode_ct(16, false, [0, 24, 1024, 1324, 4095, 65535]);
        assert_eq!(slice.samples.dim(), (2, 3));
        assert_eq!(hounsfield(&slice), [-1024, -1000, 0, 300, 3071, i16::MAX]);
    }

    #[test]
    fn signed_16_bit_ct_is_rescaled_to_hounsfield() {
        let stored = [-1000i16, -1, 0, 1324, 3000, i16::MIN].map(|v| v as u16);
        let slice = decode_ct(16, true, stored);
        assert_eq!(hounsfield(&slice), [-2024, -1025, -1024, 300, 1976, i16::MIN]);
    }

    #[test]
    fn unsigned_12_bit_ct_is_rescaled_to_hounsfield() {
        let slice = decode_ct(12, false, [0, 1, 1024, 1324, 2048, 4095]);
        assert_eq!(hounsfield(&slice), [-1024, -1023, 0, 300, 1024, 3071]);
    }

    #[test]
    fn signed_12_bit_ct_is_rescaled_to_hounsfield() {
        let stored = [-2048i16, -100, 0, 1, 1324, 2047].map(|v| v as u16);
        let slice = decode_ct(12, true, stored);
        assert_eq!(hounsfield(&slice), [-3072, -1124, -1024, -1023, 300, 1023]);
    }

    #[test]
    fn header_reads_geometry_and_rescale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ct.dcm");
        write_ct_slice(&path, 16, false, [0; 6]);

        let header = DicomSliceDecoder.read_header(&path).unwrap();
        assert_eq!(header.series_instance_uid, "2.25.77");
        assert_eq!(header.series_date.as_deref(), Some("20240101"));
        assert_eq!(header.modality.as_deref(), Some("CT"));
        assert_eq!(header.instance_number, Some(7));
        assert_eq!(header.image_position, Some([-120.5, -80.0, 42.25]));
        assert_eq!(header.image_orientation, Some([1.0, 0.0, 0.0, 0.0, 1.0, 0.0]));
        assert_eq!(header.pixel_spacing, Some([0.5, 0.75]));
        assert_eq!(header.slice_thickness, Some(2.5));
        assert_eq!(header.rescale_slope, Some(1.0));
        assert_eq!(header.rescale_intercept, Some(-1024.0));
        assert_eq!((header.rows, header.columns), (2, 3));
        assert_eq!(DicomSliceDecoder.decode(&path).unwrap().header, header);
    }

    #[test]
    fn rescale_rounds_and_saturates() {
        assert_eq!(rescale(1324.0, 1.0, -1024.0), 300);
        assert_eq!(rescale(3.0, 0.5, 0.0), 2);
        assert_eq!(rescale(65535.0, 1.0, -1024.0), i16::MAX);
        assert_eq!(rescale(-32768.0, 1.0, -1024.0), i16::MIN);
    }

    #[test]
    fn axial_orientation_has_z_normal() {
        let header = SliceHeader {
            image_orientation: Some([1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
            ..Default::default()
        };
        assert_eq!(header.slice_normal(), Some([0.0, 0.0, 1.0]));
    }

    #[test]
    fn missing_orientation_has_no_normal() {
        assert_eq!(SliceHeader::default().slice_normal(), None);
    }

    #[test]
    fn zero_vector_does_not_normalize() {
        assert_eq!(normalize([0.0, 0.0, 0.0]), None);
    }

    #[test]
    fn non_dicom_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"not a dicom file").unwrap();
        assert!(DicomSliceDecoder.read_header(&path).is_err());
    }
}
