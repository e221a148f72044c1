use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocatorError {
    /// A query was made while the structure is invalid; rebuild first.
    #[error("Neighbor locator is invalid and must be rebuilt before it is queried")]
    StaleStructure,
    #[error(
        "The height of the periodic cell along axis {axis} ({height}) is smaller than the cutoff ({cutoff})"
    )]
    GeometryTooSmall { axis: usize, height: f64, cutoff: f64 },
    /// The caller-supplied buffers cannot hold the neighbor list.
    #[error(
        "Neighbor list buffer overrun: capacity {capacity} exhausted (size buffers with max_neighbor_list_length)"
    )]
    CapacityExceeded { capacity: usize },
    #[error("Cell matrix is not invertible")]
    SingularCell,
    #[error("Invalid locator configuration: {0}")]
    InvalidConfig(String),
    #[error("Atom index {index} out of range (number of atoms is {count})")]
    AtomOutOfRange { index: usize, count: usize },
    #[error("Query radius {requested} exceeds the locator cutoff {cutoff}")]
    QueryRadiusTooLarge { requested: f64, cutoff: f64 },
    #[error("Query radius {requested} must be finite and non-negative")]
    InvalidQueryRadius { requested: f64 },
}

pub type Result<T> = std::result::Result<T, LocatorError>;
