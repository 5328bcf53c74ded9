use thiserror::Error;

use crate::mapping::Field;

/// Errors raised while building or expanding a [`crate::RecurrenceRule`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A field received a value outside of its domain. The field keeps its
    /// previous value.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// The field that rejected the value
        field: Field,
        /// Why the value was rejected
        reason: String,
    },

    /// A mapping contained a key that is not a rule field.
    #[error("unknown rule field `{0}`")]
    UnknownField(String),

    /// Both `count` and `until` were supplied at once.
    #[error("`count` and `until` are mutually exclusive")]
    ConflictingTermination,

    /// The rule has neither `count` nor `until`, and no cap was supplied.
    #[error("rule is open-ended: set `count` or `until`, or supply a cap")]
    UnboundedExpansion,

    /// Expansion needs a start instant.
    #[error("rule has no start")]
    MissingStart,
}

impl Error {
    pub(crate) fn invalid(field: Field, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Shorthand for results carrying this crate's [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
