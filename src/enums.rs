/// How the slices of a series are put into acquisition order.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    /// Position along the slice normal, from Image Position/Orientation (Patient).
    #[default]
    ImagePositionPatient,
    InstanceNumber,
    /// Keep the directory enumeration order (sorted by path).
    None,
}
