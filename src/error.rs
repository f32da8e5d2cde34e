//! # Controller Errors
//!
//! Error type shared across the controller, with the retry classification the
//! worker pool uses to decide between backing off and waiting for new events.

use thiserror::Error;

/// Errors produced while reconciling a `Dummy` or its child pod.
#[derive(Debug, Error)]
pub enum Error {
    /// Call against the Kubernetes API failed.
    #[error("Kubernetes API error: {source}")]
    Api {
        #[from]
        source: kube::Error,
    },

    /// A child pod could not be linked back to its parent.
    #[error("owner linkage failed: {reason}")]
    OwnerLinkage { reason: String },

    /// An object from the API is missing a field needed to address it.
    #[error("object is missing {field}")]
    MissingObjectKey { field: &'static str },
}

impl Error {
    #[must_use]
    pub fn owner_linkage(reason: impl Into<String>) -> Self {
        Self::OwnerLinkage {
            reason: reason.into(),
        }
    }

    fn api_code(&self) -> Option<u16> {
        match self {
            Self::Api {
                source: kube::Error::Api(response),
            } => Some(response.code),
            _ => None,
        }
    }

    /// True when a write was rejected because our copy of the object was
    /// stale, or a create raced with another writer.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    /// True when the API reported the object missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    /// Whether retrying the same pass later can be expected to succeed.
    ///
    /// Conflicts, throttling, server-side failures, and transport errors
    /// retry. Other client-side rejections and broken object preconditions
    /// wait for new events instead.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { .. } => match self.api_code() {
                Some(409 | 429) => true,
                Some(code) if (400..500).contains(&code) => false,
                _ => true,
            },
            Self::OwnerLinkage { .. } | Self::MissingObjectKey { .. } => false,
        }
    }
}
