use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot read spreadsheet: {0}")]
    Sheet(#[from] crate::sheet::SheetError),

    #[error(transparent)]
    Routing(#[from] crate::routing::RoutingError),

    #[error("job store error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("no destination match")]
    NoDestinationMatch,

    #[error("job timed out during {step}")]
    Timeout { step: &'static str },

    #[error("dispatch failed for groups: {} (first error: {first_error})", .groups.join(", "))]
    DispatchFailed {
        groups: Vec<String>,
        first_error: String,
    },
}

/// Delivery result for one routed group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOutcome {
    pub group_id: String,
    pub delivered: bool,
    pub error: Option<String>,
}
