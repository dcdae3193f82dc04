//! Remote geocache service contract
//!
//! The web API client itself lives outside this crate. Stages only need to
//! fetch a cache by code or run a search, and must be able to tell "service
//! unavailable" apart from other failures so opportunistic lookups can carry on.

use crate::Waypoint;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Geocache service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Geocache service rejected the request: {0}")]
    Rejected(String),
}

/// Search parameters understood by every service
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchQuery {
    /// Center of the search as (latitude, longitude)
    pub center: Option<(f64, f64)>,
    pub radius_km: Option<f64>,
    pub text: Option<String>,
    pub max_results: usize,
}

/// Source of geocache records with a geocache facet attached
pub trait GeocacheService: Send + Sync {
    /// `Ok(None)` when the code does not exist
    fn fetch_by_code(&self, code: &str) -> Result<Option<Waypoint>, RemoteError>;

    fn search(&self, query: &SearchQuery) -> Result<Vec<Waypoint>, RemoteError>;
}

/// Service used when no client is configured; every call is unavailable
pub struct OfflineService;

impl GeocacheService for OfflineService {
    fn fetch_by_code(&self, _code: &str) -> Result<Option<Waypoint>, RemoteError> {
        Err(RemoteError::ServiceUnavailable("offline".to_string()))
    }

    fn search(&self, _query: &SearchQuery) -> Result<Vec<Waypoint>, RemoteError> {
        Err(RemoteError::ServiceUnavailable("offline".to_string()))
    }
}

impl RemoteError {
    /// Whether retrying later could succeed
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_service_is_unavailable() {
        let service = OfflineService;
        assert!(service.fetch_by_code("GC1").unwrap_err().is_unavailable());
        assert!(service.search(&SearchQuery::default()).unwrap_err().is_unavailable());
        assert!(!RemoteError::Rejected("quota".to_string()).is_unavailable());
    }
}
