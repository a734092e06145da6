//! Set of API server endpoints
//!
//! Cluster status keeps API endpoints as a list; this wraps it with set
//! semantics so concurrent writers converge on the same ordered content.

use crds::APIEndpoint;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiEndpointSet(BTreeSet<APIEndpoint>);

impl ApiEndpointSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the endpoint was not already present
    pub fn insert(&mut self, endpoint: APIEndpoint) -> bool {
        self.0.insert(endpoint)
    }

    pub fn has(&self, endpoint: &APIEndpoint) -> bool {
        self.0.contains(endpoint)
    }

    /// Returns `true` if the endpoint was present
    pub fn delete(&mut self, endpoint: &APIEndpoint) -> bool {
        self.0.remove(endpoint)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &APIEndpoint> {
        self.0.iter()
    }

    /// Endpoints as `host:port` strings, in set order
    pub fn addresses(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }

    pub fn into_vec(self) -> Vec<APIEndpoint> {
        self.0.into_iter().collect()
    }
}

impl FromIterator<APIEndpoint> for ApiEndpointSet {
    fn from_iter<I: IntoIterator<Item = APIEndpoint>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a APIEndpoint> for ApiEndpointSet {
    fn from_iter<I: IntoIterator<Item = &'a APIEndpoint>>(iter: I) -> Self {
        Self(iter.into_iter().cloned().collect())
    }
}
