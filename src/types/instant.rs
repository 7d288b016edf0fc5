//! Month-granularity time instants

use serde::{Deserialize, Serialize};
use time::macros::format_description;

use crate::error::MosaicistError;

/// A (year, month) pair addressing one monthly raster.
///
/// Deserialises from a two element array, e.g. `[2020, 6]`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(from = "(i32, u8)", into = "(i32, u8)")]
pub struct TimeInstant {
    pub year: i32,
    pub month: u8,
}

impl TimeInstant {
    pub fn new(year: i32, month: u8) -> Self {
        TimeInstant { year, month }
    }

    /// Render the first day of the month at midnight UTC as used by WCS time subsets, e.g.
    /// `2020-06-01T00:00:00.000Z`.
    pub fn to_iso8601(&self) -> Result<String, MosaicistError> {
        let month = time::Month::try_from(self.month)?;
        let date = time::Date::from_calendar_date(self.year, month, 1)?;
        let formatted = date.midnight().assume_utc().format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
        ))?;
        Ok(formatted)
    }

    /// Short `YYYY-MM` label used in responses.
    pub fn label(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

impl std::fmt::Display for TimeInstant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl From<(i32, u8)> for TimeInstant {
    fn from((year, month): (i32, u8)) -> Self {
        TimeInstant::new(year, month)
    }
}

impl From<TimeInstant> for (i32, u8) {
    fn from(instant: TimeInstant) -> Self {
        (instant.year, instant.month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_test::{assert_de_tokens, Token};

    #[test]
    fn to_iso8601() {
        assert_eq!(
            "2020-06-01T00:00:00.000Z",
            TimeInstant::new(2020, 6).to_iso8601().unwrap()
        );
        assert_eq!(
            "1999-12-01T00:00:00.000Z",
            TimeInstant::new(1999, 12).to_iso8601().unwrap()
        );
    }

    #[test]
    #[should_panic(expected = "InvalidInstant")]
    fn to_iso8601_month_zero() {
        TimeInstant::new(2020, 0).to_iso8601().unwrap();
    }

    #[test]
    #[should_panic(expected = "InvalidInstant")]
    fn to_iso8601_month_thirteen() {
        TimeInstant::new(2020, 13).to_iso8601().unwrap();
    }

    #[test]
    fn label() {
        assert_eq!("2020-06", TimeInstant::new(2020, 6).label());
        assert_eq!("0999-01", TimeInstant::new(999, 1).to_string());
    }

    #[test]
    fn deserialise_from_pair() {
        assert_de_tokens(
            &TimeInstant::new(2020, 6),
            &[
                Token::Tuple { len: 2 },
                Token::I32(2020),
                Token::U8(6),
                Token::TupleEnd,
            ],
        );
    }

    #[test]
    fn ordering() {
        assert!(TimeInstant::new(2019, 12) < TimeInstant::new(2020, 1));
        assert!(TimeInstant::new(2020, 1) < TimeInstant::new(2020, 2));
    }
}
