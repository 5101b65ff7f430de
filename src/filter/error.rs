use thiserror::Error;

/// Errors raised while turning query-string parameters into a compiled query.
///
/// Every variant except `InvalidSchema` is a client input defect and is
/// reported back as a validation failure. `InvalidSchema` only happens while
/// schemas are registered at startup.
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Unknown column: {entity}__{column}")]
    UnknownColumn { entity: String, column: String },

    #[error("No join path from {from} to {to}")]
    NoJoinPath { from: String, to: String },

    #[error("Entity {0} is already joined through another relation; aliased joins are not supported")]
    AmbiguousJoin(String),

    #[error("Search is not available here")]
    SearchUnavailable,

    #[error("Search error processing: {0}")]
    InvalidSearch(String),

    #[error("Can't process period value: {0}")]
    InvalidPeriod(String),

    #[error("Invalid {0} number filter.")]
    InvalidNumberFilter(String),

    #[error("Invalid {0} filter.")]
    InvalidFilter(String),

    #[error("Invalid value for {column}: {reason}")]
    InvalidFilterValue { column: String, reason: String },

    #[error("{kind} invalid format: {reason}")]
    InvalidFormat { kind: &'static str, reason: String },

    #[error("Invalid sort column: {column}. Possible values are: {allowed}")]
    InvalidSortColumn { column: String, allowed: String },

    #[error("Can not apply two sorts")]
    DoubleSort,

    #[error("{0} must be greater than or equal to 1")]
    InvalidPagination(&'static str),

    #[error("Invalid schema declaration: {0}")]
    InvalidSchema(String),
}

impl FilterError {
    pub fn is_client_error(&self) -> bool {
        !matches!(self, FilterError::InvalidSchema(_))
    }
}
