use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

use crate::controller::ControlResponse;

/// Errors produced by the load engine and its configuration layer.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A configuration update was rejected; nothing was changed.
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// A cancellation was requested for a run that is no longer current.
    #[error("generation {requested} is stale (current: {current:?})")]
    StaleGeneration {
        requested: u64,
        current: Option<u64>,
    },

    /// The signal of this generation has already fired.
    #[error("cancellation for generation {generation} already triggered")]
    AlreadyTriggered { generation: u64 },

    /// A worker thread could not be created.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Startup configuration is unusable.
    #[error("startup configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Race guards are expected under concurrent stop/timeout and are never fatal.
    pub fn is_race_guard(&self) -> bool {
        matches!(
            self,
            EngineError::StaleGeneration { .. } | EngineError::AlreadyTriggered { .. }
        )
    }
}

impl ResponseError for EngineError {
    fn status_code(&self) -> StatusCode {
        match self {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ControlResponse::error(self.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        let err = EngineError::Validation("percentage_cpu must be at most 100".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_race_guard());
    }

    #[test]
    fn race_guards_are_flagged() {
        let stale = EngineError::StaleGeneration {
            requested: 1,
            current: Some(2),
        };
        let fired = EngineError::AlreadyTriggered { generation: 2 };
        assert!(stale.is_race_guard());
        assert!(fired.is_race_guard());
        assert_eq!(stale.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
