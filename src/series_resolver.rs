use crate::decoder::{SliceDecoder, SliceHeader, dot};
use crate::enums::SortBy;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::{fs, io};
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No DICOM series found in {}", .directory.display())]
    NoSeriesFound { directory: PathBuf },

    #[error("Series {series} has no slice files")]
    EmptySeries { series: String },

    #[error("Cannot read directory {}: {source}", .directory.display())]
    Io {
        directory: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The ordered slice files of one acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceSeries {
    pub identifier: String,
    pub files: Vec<PathBuf>,
}

/// Description of a discovered series, for listing.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSummary {
    pub identifier: String,
    pub series_instance_uid: String,
    pub series_date: Option<String>,
    pub description: Option<String>,
    pub modality: Option<String>,
    pub slice_count: usize,
}

struct SeriesGroup {
    identifier: String,
    slices: Vec<(PathBuf, SliceHeader)>,
}

/// Discovers the series in a directory and orders the slices of one of them.
pub struct SeriesResolver<'a, D: SliceDecoder> {
    decoder: &'a D,
    sort_by: SortBy,
}

impl<'a, D: SliceDecoder> SeriesResolver<'a, D> {
    pub fn new(decoder: &'a D, sort_by: SortBy) -> Self {
        Self { decoder, sort_by }
    }

    /// Resolve the slice files of one series in acquisition order.
    ///
    /// Without a selector the first series of the (path sorted) directory
    /// listing is used. A selector matches a series identifier exactly, or
    /// otherwise the bare Series Instance UID.
    ///
    /// # Errors
    ///
    /// `NoSeriesFound` when the directory holds no readable slices,
    /// `EmptySeries` when the selector matches nothing.
    #[instrument(skip(self, directory), fields(directory = %directory.as_ref().display()))]
    pub fn resolve(
        &self,
        directory: impl AsRef<Path>,
        selector: Option<&str>,
    ) -> Result<SliceSeries, ResolveError> {
        let groups = self.scan(directory.as_ref())?;
        let group = match selector {
            None => groups.into_iter().next(),
            Some(selector) => Self::select(groups, selector),
        }
        .ok_or_else(|| ResolveError::EmptySeries {
            series: selector.unwrap_or_default().to_string(),
        })?;

        if group.slices.is_empty() {
            return Err(ResolveError::EmptySeries {
                series: group.identifier,
            });
        }

        debug!(series = %group.identifier, slices = group.slices.len(), "resolved series");
        let identifier = group.identifier;
        let files = self.order_slices(group.slices);
        Ok(SliceSeries { identifier, files })
    }

    /// List every series found in the directory, in discovery order.
    ///
    /// # Errors
    ///
    /// `NoSeriesFound` when the directory holds no readable slices.
    pub fn list_series(
        &self,
        directory: impl AsRef<Path>,
    ) -> Result<Vec<SeriesSummary>, ResolveError> {
        let groups = self.scan(directory.as_ref())?;
        Ok(groups
            .into_iter()
            .map(|group| {
                let header = &group.slices[0].1;
                SeriesSummary {
                    series_instance_uid: header.series_instance_uid.clone(),
                    series_date: header.series_date.clone(),
                    description: header.series_description.clone(),
                    modality: header.modality.clone(),
                    slice_count: group.slices.len(),
                    identifier: group.identifier,
                }
            })
            .collect())
    }

    fn scan(&self, directory: &Path) -> Result<Vec<SeriesGroup>, ResolveError> {
        let io_error = |source| ResolveError::Io {
            directory: directory.to_path_buf(),
            source,
        };
        let mut paths: Vec<_> = fs::read_dir(directory)
            .map_err(io_error)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        let mut groups: Vec<SeriesGroup> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for path in paths {
            let header = match self.decoder.read_header(&path) {
                Ok(header) => header,
                Err(error) => {
                    debug!(path = %path.display(), %error, "skipping non-slice file");
                    continue;
                }
            };
            let identifier = Self::series_identifier(&header);
            let slot = *index.entry(identifier.clone()).or_insert_with(|| {
                groups.push(SeriesGroup {
                    identifier,
                    slices: Vec::new(),
                });
                groups.len() - 1
            });
            groups[slot].slices.push((path, header));
        }

        if groups.is_empty() {
            return Err(ResolveError::NoSeriesFound {
                directory: directory.to_path_buf(),
            });
        }
        Ok(groups)
    }

    /// Series UID restricted by Series Date, so acquisitions that share a
    /// coarse UID stay apart.
    fn series_identifier(header: &SliceHeader) -> String {
        match &header.series_date {
            Some(date) => format!("{}.{}", header.series_instance_uid, date),
            None => header.series_instance_uid.clone(),
        }
    }

    fn select(groups: Vec<SeriesGroup>, selector: &str) -> Option<SeriesGroup> {
        if let Some(position) = groups.iter().position(|g| g.identifier == selector) {
            return groups.into_iter().nth(position);
        }
        groups.into_iter().find(|group| {
            group
                .slices
                .first()
                .is_some_and(|(_, header)| header.series_instance_uid == selector)
        })
    }

    fn order_slices(&self, mut slices: Vec<(PathBuf, SliceHeader)>) -> Vec<PathBuf> {
        let mut sort_by = self.sort_by;
        if sort_by == SortBy::ImagePositionPatient && Self::position_keys(&slices).is_none() {
            warn!("slices lack position or orientation, ordering by instance number");
            sort_by = SortBy::InstanceNumber;
        }
        if sort_by == SortBy::InstanceNumber
            && slices.iter().any(|(_, h)| h.instance_number.is_none())
        {
            warn!("slices lack instance numbers, keeping file order");
            sort_by = SortBy::None;
        }

        match sort_by {
            SortBy::ImagePositionPatient => {
                if let Some(keys) = Self::position_keys(&slices) {
                    let mut keyed: Vec<_> = keys.into_iter().zip(slices).collect();
                    keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
                    slices = keyed.into_iter().map(|(_, slice)| slice).collect();
                }
            }
            SortBy::InstanceNumber => slices.sort_by_key(|(_, h)| h.instance_number),
            SortBy::None => {}
        }

        slices.into_iter().map(|(path, _)| path).collect()
    }

    /// Distance of each slice along the normal of the first slice.
    fn position_keys(slices: &[(PathBuf, SliceHeader)]) -> Option<Vec<f64>> {
        let normal = slices.first()?.1.slice_normal()?;
        slices
            .iter()
            .map(|(_, header)| header.image_position.map(|p| dot(p, normal)))
            .collect()
    }
}
