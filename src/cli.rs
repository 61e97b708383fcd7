//! Command line arguments.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use dicom_tensor::enums::SortBy;
use dicom_tensor::normalizer::IntensityWindow;

#[derive(Parser)]
#[command(
    name = "dicom-tensor",
    version,
    about = "Assemble a DICOM series into a normalized [1, 1, X, Y, Z] tensor and run a model on it",
    override_usage = "dicom-tensor [OPTIONS] <DIRECTORY> [SERIES] <MODEL>\n       \
                      dicom-tensor --inspect [OPTIONS] <DIRECTORY> [SERIES]\n       \
                      dicom-tensor --list-series <DIRECTORY>"
)]
pub struct Cli {
    /// Directory holding the slice files.
    #[arg(value_name = "DIRECTORY")]
    pub directory: PathBuf,

    /// Optional series identifier, followed by the model path.
    #[arg(value_name = "SERIES|MODEL", num_args = 0..=2)]
    pub rest: Vec<String>,

    /// Print volume diagnostics and intensity statistics without a model.
    #[arg(long, conflicts_with = "list_series")]
    pub inspect: bool,

    /// List the series found in DIRECTORY and exit.
    #[arg(long)]
    pub list_series: bool,

    /// Slice ordering within the series.
    #[arg(long, value_enum, default_value = "position")]
    pub sort_by: SortByArg,

    /// Lower bound of the intensity window.
    #[arg(long, default_value_t = IntensityWindow::default().low_clip, allow_negative_numbers = true)]
    pub low_clip: f32,

    /// Upper bound of the intensity window.
    #[arg(long, default_value_t = IntensityWindow::default().high_clip, allow_negative_numbers = true)]
    pub high_clip: f32,

    /// Value substituted for invalid (NaN) samples before windowing.
    #[arg(long, default_value_t = IntensityWindow::default().invalid_value, allow_negative_numbers = true)]
    pub invalid_value: f32,

    /// Save the middle axial slice of the normalized volume as an image.
    #[arg(long, value_name = "PNG")]
    pub preview: Option<PathBuf>,

    /// Write the prepared tensor as raw native-endian f32 values.
    #[arg(long, value_name = "FILE")]
    pub dump: Option<PathBuf>,

    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,

    /// Log output format.
    #[arg(long, value_enum, default_value = "pretty")]
    pub log_format: LogFormatArg,
}

impl Cli {
    pub fn window(&self) -> IntensityWindow {
        IntensityWindow::new(self.low_clip, self.high_clip).with_invalid_value(self.invalid_value)
    }

    /// Split the trailing positionals into (series, model).
    pub fn series_and_model(&self) -> Result<(Option<&str>, Option<&str>), String> {
        let rest: Vec<&str> = self.rest.iter().map(String::as_str).collect();
        match (self.inspect || self.list_series, rest.as_slice()) {
            (true, []) => Ok((None, None)),
            (true, [series]) => Ok((Some(*series), None)),
            (false, [model]) => Ok((None, Some(*model))),
            (false, [series, model]) => Ok((Some(*series), Some(*model))),
            (true, _) => Err("expected at most one SERIES argument".to_string()),
            (false, _) => Err("missing MODEL argument".to_string()),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SortByArg {
    /// Position along the slice normal.
    Position,
    InstanceNumber,
    /// File name order.
    None,
}

impl From<SortByArg> for SortBy {
    fn from(arg: SortByArg) -> Self {
        match arg {
            SortByArg::Position => SortBy::ImagePositionPatient,
            SortByArg::InstanceNumber => SortBy::InstanceNumber,
            SortByArg::None => SortBy::None,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}
