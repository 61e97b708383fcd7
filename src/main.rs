use std::fs;
use std::io::{self, IsTerminal};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use dicom_tensor::{
    decoder::DicomSliceDecoder,
    inference::IntensitySummary,
    logging::{LogConfig, LogFormat, init_logging},
    pipeline::{Pipeline, PipelineOptions, PreparedInput},
    series_resolver::SeriesResolver,
};
use tracing::info;

mod cli;

use crate::cli::{Cli, LogFormatArg};

fn main() {
    let cli = Cli::parse();
    if let Err(error) = init_logging(&log_config_from_cli(&cli)) {
        eprintln!("error: failed to initialize logging: {error}");
        std::process::exit(1);
    }
    if let Err(error) = run(&cli) {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let (series, model) = cli.series_and_model().map_err(|message| anyhow!(message))?;
    let decoder = DicomSliceDecoder;
    let options = PipelineOptions {
        sort_by: cli.sort_by.into(),
        window: cli.window(),
        keep_normalized: cli.preview.is_some(),
    };

    if cli.list_series {
        let listed = SeriesResolver::new(&decoder, options.sort_by)
            .list_series(&cli.directory)
            .with_context(|| format!("listing series in {}", cli.directory.display()))?;
        for summary in listed {
            println!(
                "{}\t{} slices\t{}\t{}",
                summary.identifier,
                summary.slice_count,
                summary.modality.as_deref().unwrap_or("-"),
                summary.description.as_deref().unwrap_or("-"),
            );
        }
        return Ok(());
    }

    let pipeline = Pipeline::new(&decoder, options);
    let prepared = match model {
        None => {
            let (prepared, stats) = pipeline.run(&cli.directory, series, &mut IntensitySummary)?;
            info!(mean = stats.mean, min = stats.min, max = stats.max, "intensity");
            prepared
        }
        Some(model) => run_model(&pipeline, cli, series, model)?,
    };

    write_outputs(cli, &prepared)
}

#[cfg(feature = "onnx")]
fn run_model(
    pipeline: &Pipeline<'_, DicomSliceDecoder>,
    cli: &Cli,
    series: Option<&str>,
    model: &str,
) -> Result<PreparedInput> {
    use dicom_tensor::inference::OnnxInvoker;

    let mut invoker =
        OnnxInvoker::from_file(model).with_context(|| format!("loading model {model}"))?;
    let (prepared, output) = pipeline.run(&cli.directory, series, &mut invoker)?;
    info!(shape = ?output.shape, "model output");
    Ok(prepared)
}

#[cfg(not(feature = "onnx"))]
fn run_model(
    _pipeline: &Pipeline<'_, DicomSliceDecoder>,
    _cli: &Cli,
    _series: Option<&str>,
    model: &str,
) -> Result<PreparedInput> {
    Err(anyhow!(
        "cannot run {model}: built without the `onnx` feature (use --inspect)"
    ))
}

fn write_outputs(cli: &Cli, prepared: &PreparedInput) -> Result<()> {
    if let Some(path) = &cli.dump {
        fs::write(path, prepared.tensor.as_bytes())
            .with_context(|| format!("writing tensor to {}", path.display()))?;
        info!(path = %path.display(), "tensor written");
    }
    if let (Some(path), Some(normalized)) = (&cli.preview, &prepared.normalized) {
        let image = normalized
            .axial_image(prepared.geometry.size.z / 2)
            .context("volume has no axial slice to preview")?;
        image
            .save(path)
            .with_context(|| format!("saving preview to {}", path.display()))?;
        info!(path = %path.display(), "preview saved");
    }
    Ok(())
}

fn log_config_from_cli(cli: &Cli) -> LogConfig {
    LogConfig {
        level_filter: cli.verbosity.tracing_level_filter(),
        use_env_filter: !cli.verbosity.is_present(),
        format: match cli.log_format {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        },
        with_ansi: io::stderr().is_terminal(),
    }
}
