//! Resource identity and snapshot abstractions.
//!
//! Watched objects live in an external declarative store; the dispatch core
//! only needs a stable identity, a staleness marker, and a handful of
//! metadata accessors. `Resource` is the seam controllers implement for
//! their own object types; `UnstructuredResource` is a ready-made
//! implementation for schema-less objects and tests.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unique key for one watched resource: scope (namespace), name and kind.
///
/// Immutable once created; all per-resource dispatch state is keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentity {
    /// Namespace or scope the resource lives in. Empty for cluster scope.
    pub namespace: String,
    /// Resource name, unique within its namespace and kind.
    pub name: String,
    /// Resource kind.
    pub kind: String,
}

impl ResourceIdentity {
    /// Create a namespaced identity.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind: kind.into(),
        }
    }

    /// Create a cluster-scoped identity (empty namespace).
    pub fn cluster_scoped(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::new("", name, kind)
    }
}

impl std::fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}

/// Opaque per-resource version token reported by the external system.
///
/// Only comparable for equality, and only between versions of the same
/// resource; it carries no ordering across resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceVersion(String);

impl ResourceVersion {
    /// Wrap a raw version token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of a watched resource as the dispatch core sees it.
pub trait Resource: Clone + Send + Sync + 'static {
    /// Identity of this resource.
    fn identity(&self) -> ResourceIdentity;

    /// Current version marker.
    fn resource_version(&self) -> ResourceVersion;

    /// Spec generation: advances only on desired-state changes, not on
    /// status-only updates. `None` when the external system does not track
    /// generations for this kind.
    fn generation(&self) -> Option<i64>;

    /// Labels attached to the resource.
    fn labels(&self) -> &HashMap<String, String>;

    /// Finalizers currently recorded on the resource.
    fn finalizers(&self) -> &[String];

    /// Whether the external system has marked this resource for deletion.
    fn deletion_requested(&self) -> bool;

    /// Whether a given finalizer is recorded on the resource.
    fn has_finalizer(&self, name: &str) -> bool {
        self.finalizers().iter().any(|f| f == name)
    }
}

/// Common resource metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceMeta {
    /// Namespace, empty for cluster scope.
    pub namespace: String,
    /// Resource name.
    pub name: String,
    /// Resource kind.
    pub kind: String,
    /// Version token from the external store.
    pub resource_version: String,
    /// Spec generation, if tracked.
    pub generation: Option<i64>,
    /// Labels.
    pub labels: HashMap<String, String>,
    /// Recorded finalizers.
    pub finalizers: Vec<String>,
    /// Deletion has been requested externally.
    pub deletion_requested: bool,
}

/// Schema-less resource: metadata plus free-form spec and status documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnstructuredResource {
    /// Metadata.
    pub meta: ResourceMeta,
    /// Desired-state document.
    pub spec: Value,
    /// Observed-state document.
    pub status: Value,
}

impl UnstructuredResource {
    /// Create a resource with the given identity coordinates.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            meta: ResourceMeta {
                namespace: namespace.into(),
                name: name.into(),
                kind: kind.into(),
                resource_version: "0".to_string(),
                ..ResourceMeta::default()
            },
            spec: Value::Null,
            status: Value::Null,
        }
    }

    /// Set the version token.
    pub fn with_resource_version(mut self, version: impl Into<String>) -> Self {
        self.meta.resource_version = version.into();
        self
    }

    /// Set the spec generation.
    pub fn with_generation(mut self, generation: i64) -> Self {
        self.meta.generation = Some(generation);
        self
    }

    /// Add a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.labels.insert(key.into(), value.into());
        self
    }

    /// Record a finalizer.
    pub fn with_finalizer(mut self, name: impl Into<String>) -> Self {
        self.meta.finalizers.push(name.into());
        self
    }

    /// Mark the resource as deletion-requested.
    pub fn marked_for_deletion(mut self) -> Self {
        self.meta.deletion_requested = true;
        self
    }

    /// Set the spec document.
    pub fn with_spec(mut self, spec: Value) -> Self {
        self.spec = spec;
        self
    }
}

impl Resource for UnstructuredResource {
    fn identity(&self) -> ResourceIdentity {
        ResourceIdentity::new(
            self.meta.namespace.clone(),
            self.meta.name.clone(),
            self.meta.kind.clone(),
        )
    }

    fn resource_version(&self) -> ResourceVersion {
        ResourceVersion::new(self.meta.resource_version.clone())
    }

    fn generation(&self) -> Option<i64> {
        self.meta.generation
    }

    fn labels(&self) -> &HashMap<String, String> {
        &self.meta.labels
    }

    fn finalizers(&self) -> &[String] {
        &self.meta.finalizers
    }

    fn deletion_requested(&self) -> bool {
        self.meta.deletion_requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_display() {
        let id = ResourceIdentity::new("prod", "web", "Deployment");
        assert_eq!(id.to_string(), "Deployment/prod/web");

        let cluster = ResourceIdentity::cluster_scoped("node-1", "Node");
        assert_eq!(cluster.to_string(), "Node/node-1");
    }

    #[test]
    fn test_identity_equality() {
        let a = ResourceIdentity::new("ns", "a", "Widget");
        let b = ResourceIdentity::new("ns", "a", "Widget");
        let c = ResourceIdentity::new("ns", "a", "Gadget");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_unstructured_resource_accessors() {
        let resource = UnstructuredResource::new("ns", "obj", "Widget")
            .with_resource_version("42")
            .with_generation(3)
            .with_label("app", "web")
            .with_finalizer("widgets/finalizer");

        assert_eq!(resource.resource_version().as_str(), "42");
        assert_eq!(resource.generation(), Some(3));
        assert!(resource.has_finalizer("widgets/finalizer"));
        assert!(!resource.has_finalizer("other/finalizer"));
        assert!(!resource.deletion_requested());
    }

    #[test]
    fn test_marked_for_deletion() {
        let resource = UnstructuredResource::new("ns", "obj", "Widget").marked_for_deletion();
        assert!(resource.deletion_requested());
    }
}
