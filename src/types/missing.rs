//! Missing data descriptors
//!
//! Rasters can contain missing data which should be ignored during computation. There are
//! multiple ways to describe the missing data. Currently we support:
//!
//! * A single missing value, e.g. the nodata sentinel or the minimum of a grid
//! * A valid minimum value, e.g. zero for precipitation clipped to a boundary

/// Missing data
///
/// Generic over the type of missing data values so that descriptors can be checked against cell
/// values of any ordered type.
#[derive(Clone, Debug, PartialEq)]
pub enum Missing<T> {
    /// A single missing value
    MissingValue(T),
    /// Valid minimum
    ValidMin(T),
}

impl<T: PartialOrd> Missing<T> {
    /// Filter function to check whether the provided value is a 'missing' value
    pub fn is_missing(&self, x: &T) -> bool {
        match self {
            Missing::MissingValue(value) => x == value,
            Missing::ValidMin(min) => x < min,
        }
    }

    /// Filter function to check whether the provided value is present.
    pub fn is_present(&self, x: &T) -> bool {
        !self.is_missing(x)
    }
}
