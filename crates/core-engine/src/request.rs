//! Access requests and the pre-processing step that resolves zones.

use crate::engine::PolicyEngine;
use core_model::{AccessResource, ANY_ACCESS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// A tag attached to the accessed resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRef {
    /// Tag type name (e.g. `PII`)
    pub tag_type: String,
}

impl TagRef {
    /// Create a tag reference
    pub fn new(tag_type: impl Into<String>) -> Self {
        Self {
            tag_type: tag_type.into(),
        }
    }
}

/// Request-scoped context filled in by pre-processing
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Zones the resource belongs to, resolved by the preprocessor
    pub zone_names: BTreeSet<String>,
    /// Tags attached to the resource, supplied by the caller
    pub tags: Vec<TagRef>,
}

/// An access request driven through repositories during discovery
#[derive(Debug, Clone)]
pub struct AccessRequest {
    resource: AccessResource,
    access_type: String,
    context: RequestContext,
}

impl AccessRequest {
    /// Create a request for a specific access type
    pub fn new(resource: AccessResource, access_type: impl Into<String>) -> Self {
        Self {
            resource,
            access_type: access_type.into(),
            context: RequestContext::default(),
        }
    }

    /// Create a request with the any-access marker (policy discovery)
    #[must_use]
    pub fn any_access(resource: AccessResource) -> Self {
        Self::new(resource, ANY_ACCESS)
    }

    /// Attach resource tags
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<TagRef>) -> Self {
        self.context.tags = tags;
        self
    }

    /// The requested resource
    #[must_use]
    pub fn resource(&self) -> &AccessResource {
        &self.resource
    }

    /// The requested access type
    #[must_use]
    pub fn access_type(&self) -> &str {
        &self.access_type
    }

    /// Whether the request carries the any-access marker
    #[must_use]
    pub fn is_access_type_any(&self) -> bool {
        self.access_type == ANY_ACCESS
    }

    /// Request-scoped context
    #[must_use]
    pub fn context(&self) -> &RequestContext {
        &self.context
    }
}

/// Resolves request context against an engine snapshot before
/// evaluation
#[derive(Debug)]
pub struct RequestPreprocessor<'a> {
    engine: &'a PolicyEngine,
}

impl<'a> RequestPreprocessor<'a> {
    /// Create a preprocessor bound to a snapshot
    #[must_use]
    pub fn new(engine: &'a PolicyEngine) -> Self {
        Self { engine }
    }

    /// Resolve the zones the request's resource belongs to and store
    /// them in the request context.
    pub fn pre_process(&self, request: &mut AccessRequest) {
        let zones = self
            .engine
            .zone_index()
            .zones_for_resource(request.resource.elements());

        debug!(?zones, "resolved zones for request");

        request.context.zone_names = zones;
    }
}
