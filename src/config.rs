//! Declarative per-controller configuration.
//!
//! All configuration is plain data assembled through a builder, with
//! defaults applied at build time. Filters are composed once here; nothing
//! is discovered or instantiated reflectively at runtime. Malformed
//! configuration is a fatal error surfaced at construction, never retried.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::filter::{self, EventFilter, GenerationAwareFilter};
use crate::resource::Resource;
use crate::retry::RetryPolicy;

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_CLEANUP_RECHECK: Duration = Duration::from_secs(1);

/// Equality requirements parsed from a label selector string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<(String, String)>,
}

impl LabelSelector {
    /// Parse a selector of the form `"key=value,key2=value2"`.
    ///
    /// An empty string selects everything.
    pub fn parse(selector: &str) -> Result<Self> {
        let trimmed = selector.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        let mut requirements = Vec::new();
        for part in trimmed.split(',') {
            let Some((key, value)) = part.split_once('=') else {
                return Err(Error::invalid_config(format!(
                    "malformed label selector term '{part}': expected key=value"
                )));
            };
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() {
                return Err(Error::invalid_config(format!(
                    "malformed label selector term '{part}': empty key"
                )));
            }
            requirements.push((key.to_string(), value.to_string()));
        }
        Ok(Self { requirements })
    }

    /// Whether a resource's labels satisfy every requirement.
    pub fn matches<R: Resource>(&self, resource: &R) -> bool {
        self.requirements
            .iter()
            .all(|(key, value)| resource.labels().get(key) == Some(value))
    }

    /// Whether this selector selects everything.
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

/// Configuration for one controller.
#[derive(Clone)]
pub struct ControllerConfig<R: Resource> {
    /// Controller name.
    pub name: String,
    /// Finalizer recorded on managed resources.
    pub finalizer_name: String,
    /// Whether this controller declares finalizer use.
    pub use_finalizer: bool,
    /// Whether status-only updates are filtered out.
    pub generation_aware: bool,
    /// Namespaces in scope; empty means all.
    pub namespaces: HashSet<String>,
    /// Label selector restricting the watched resources.
    pub label_selector: LabelSelector,
    /// Retry policy for failed attempts.
    pub retry_policy: RetryPolicy,
    /// Worker pool size.
    pub workers: usize,
    /// Re-check interval when cleanup reports it is not finished yet.
    pub cleanup_recheck: Duration,
    filter: Arc<dyn EventFilter<R>>,
}

impl<R: Resource> std::fmt::Debug for ControllerConfig<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("name", &self.name)
            .field("finalizer_name", &self.finalizer_name)
            .field("use_finalizer", &self.use_finalizer)
            .field("generation_aware", &self.generation_aware)
            .field("namespaces", &self.namespaces)
            .field("label_selector", &self.label_selector)
            .field("retry_policy", &self.retry_policy)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl<R: Resource> ControllerConfig<R> {
    /// Start building a configuration for a named controller.
    pub fn builder(name: impl Into<String>) -> ControllerConfigBuilder<R> {
        ControllerConfigBuilder::new(name)
    }

    /// The composed significance filter for update events.
    pub fn filter(&self) -> &Arc<dyn EventFilter<R>> {
        &self.filter
    }

    /// Whether a resource falls inside this controller's scope.
    pub fn in_scope(&self, resource: &R) -> bool {
        let identity = resource.identity();
        let namespace_ok =
            self.namespaces.is_empty() || self.namespaces.contains(&identity.namespace);
        namespace_ok && self.label_selector.matches(resource)
    }
}

/// Builder for [`ControllerConfig`].
pub struct ControllerConfigBuilder<R: Resource> {
    name: String,
    finalizer_name: Option<String>,
    use_finalizer: bool,
    generation_aware: bool,
    namespaces: HashSet<String>,
    label_selector: String,
    filters: Vec<Arc<dyn EventFilter<R>>>,
    retry_policy: RetryPolicy,
    workers: usize,
    cleanup_recheck: Duration,
}

impl<R: Resource> ControllerConfigBuilder<R> {
    /// Create a builder with defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            finalizer_name: None,
            use_finalizer: true,
            generation_aware: true,
            namespaces: HashSet::new(),
            label_selector: String::new(),
            filters: Vec::new(),
            retry_policy: RetryPolicy::default(),
            workers: DEFAULT_WORKERS,
            cleanup_recheck: DEFAULT_CLEANUP_RECHECK,
        }
    }

    /// Override the finalizer name. Blank values fall back to the derived
    /// default at build time.
    pub fn finalizer_name(mut self, name: impl Into<String>) -> Self {
        self.finalizer_name = Some(name.into());
        self
    }

    /// Enable or disable finalizer use.
    pub fn use_finalizer(mut self, enabled: bool) -> Self {
        self.use_finalizer = enabled;
        self
    }

    /// Enable or disable generation-aware filtering of updates.
    pub fn generation_aware(mut self, enabled: bool) -> Self {
        self.generation_aware = enabled;
        self
    }

    /// Restrict scope to a namespace. May be called multiple times.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespaces.insert(namespace.into());
        self
    }

    /// Set the label selector string, parsed at build time.
    pub fn label_selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = selector.into();
        self
    }

    /// Add a significance filter. Filters combine via logical AND.
    pub fn filter(mut self, filter: Arc<dyn EventFilter<R>>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Set a custom retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the worker pool size.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the cleanup re-check interval.
    pub fn cleanup_recheck(mut self, interval: Duration) -> Self {
        self.cleanup_recheck = interval;
        self
    }

    /// Validate and assemble the configuration.
    pub fn build(self) -> Result<ControllerConfig<R>> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::invalid_config("controller name must not be blank"));
        }
        if self.workers == 0 {
            return Err(Error::invalid_config("worker count must be at least 1"));
        }

        let finalizer_name = self
            .finalizer_name
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| format!("{name}/finalizer"));

        let label_selector = LabelSelector::parse(&self.label_selector)?;

        let mut filters = self.filters;
        if self.generation_aware {
            filters.insert(0, Arc::new(GenerationAwareFilter));
        }
        let filter = filter::compose(filters);

        Ok(ControllerConfig {
            name,
            finalizer_name,
            use_finalizer: self.use_finalizer,
            generation_aware: self.generation_aware,
            namespaces: self.namespaces,
            label_selector,
            retry_policy: self.retry_policy,
            workers: self.workers,
            cleanup_recheck: self.cleanup_recheck,
            filter,
        })
    }
}
