//! Significance filters for update notifications.
//!
//! Filters are pure predicates over the old and new resource snapshots:
//! they never mutate state and only decide whether an update is worth a
//! reconciliation. Adds and deletes are always significant and never reach
//! the filter chain. Filters compose with logical AND; an empty chain
//! behaves as a passthrough.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use crate::error::Error;
use crate::resource::{Resource, ResourceIdentity};

/// Pure predicate deciding whether an update notification is significant.
pub trait EventFilter<R: Resource>: Send + Sync {
    /// Whether the transition from `previous` to `current` should trigger a
    /// reconciliation.
    fn significant(&self, previous: &R, current: &R) -> bool;

    /// Name used in diagnostics.
    fn name(&self) -> &'static str {
        "filter"
    }
}

/// Filter that accepts every update. Default when none are configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughFilter;

impl<R: Resource> EventFilter<R> for PassthroughFilter {
    fn significant(&self, _previous: &R, _current: &R) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}

/// Filter that drops status-only updates.
///
/// Significant only when the spec generation changed between the two
/// snapshots. Resources without a tracked generation always pass, since
/// there is nothing to compare.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationAwareFilter;

impl<R: Resource> EventFilter<R> for GenerationAwareFilter {
    fn significant(&self, previous: &R, current: &R) -> bool {
        match (previous.generation(), current.generation()) {
            (Some(old), Some(new)) => old != new,
            _ => true,
        }
    }

    fn name(&self) -> &'static str {
        "generation-aware"
    }
}

/// Filter built from a plain function or closure.
pub struct FnFilter<F> {
    predicate: F,
    name: &'static str,
}

impl<F> FnFilter<F> {
    /// Wrap a predicate function.
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            name: "fn",
        }
    }

    /// Wrap a predicate function with a diagnostic name.
    pub fn named(name: &'static str, predicate: F) -> Self {
        Self { predicate, name }
    }
}

impl<R, F> EventFilter<R> for FnFilter<F>
where
    R: Resource,
    F: Fn(&R, &R) -> bool + Send + Sync,
{
    fn significant(&self, previous: &R, current: &R) -> bool {
        (self.predicate)(previous, current)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Conjunction of two filters.
pub struct AndFilter<R: Resource> {
    left: Arc<dyn EventFilter<R>>,
    right: Arc<dyn EventFilter<R>>,
}

impl<R: Resource> AndFilter<R> {
    /// Combine two filters; significant only when both agree.
    pub fn new(left: Arc<dyn EventFilter<R>>, right: Arc<dyn EventFilter<R>>) -> Self {
        Self { left, right }
    }
}

impl<R: Resource> EventFilter<R> for AndFilter<R> {
    fn significant(&self, previous: &R, current: &R) -> bool {
        self.left.significant(previous, current) && self.right.significant(previous, current)
    }

    fn name(&self) -> &'static str {
        "and"
    }
}

/// Fold a filter list into a single AND-composed filter.
///
/// An empty list yields the passthrough filter. Composition happens once at
/// configuration build time; no runtime discovery is involved.
pub fn compose<R: Resource>(filters: Vec<Arc<dyn EventFilter<R>>>) -> Arc<dyn EventFilter<R>> {
    let mut iter = filters.into_iter();
    let Some(first) = iter.next() else {
        return Arc::new(PassthroughFilter);
    };
    iter.fold(first, |acc, next| Arc::new(AndFilter::new(acc, next)))
}

/// Evaluate a filter, failing open on panic.
///
/// A filter that panics is treated as "significant" so that a buggy
/// predicate can suppress work but never silently drop a real change.
pub fn evaluate_fail_open<R: Resource>(
    filter: &Arc<dyn EventFilter<R>>,
    identity: &ResourceIdentity,
    previous: &R,
    current: &R,
) -> bool {
    match catch_unwind(AssertUnwindSafe(|| filter.significant(previous, current))) {
        Ok(significant) => significant,
        Err(_) => {
            let error = Error::filter_evaluation(
                identity.clone(),
                format!("filter '{}' panicked during evaluation", filter.name()),
            );
            warn!(
                identity = %identity,
                error = %error,
                "treating event as significant"
            );
            true
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use super::*;
    use crate::resource::UnstructuredResource;

    fn versions(old_gen: i64, new_gen: i64) -> (UnstructuredResource, UnstructuredResource) {
        let old = UnstructuredResource::new("ns", "obj", "Widget").with_generation(old_gen);
        let new = UnstructuredResource::new("ns", "obj", "Widget").with_generation(new_gen);
        (old, new)
    }

    #[test]
    fn test_passthrough_always_significant() {
        let (old, new) = versions(1, 1);
        let filter = PassthroughFilter;
        assert!(filter.significant(&old, &new));
    }

    #[test]
    fn test_generation_aware_filters_status_only_updates() {
        let filter = GenerationAwareFilter;

        let (old, new) = versions(1, 1);
        assert!(!filter.significant(&old, &new));

        let (old, new) = versions(1, 2);
        assert!(filter.significant(&old, &new));
    }

    #[test]
    fn test_generation_aware_passes_untracked_generations() {
        let filter = GenerationAwareFilter;
        let old = UnstructuredResource::new("ns", "obj", "Widget");
        let new = UnstructuredResource::new("ns", "obj", "Widget");
        assert!(filter.significant(&old, &new));
    }

    #[test]
    fn test_and_composition() {
        let (old, new) = versions(1, 2);

        let yes: Arc<dyn EventFilter<UnstructuredResource>> = Arc::new(PassthroughFilter);
        let no: Arc<dyn EventFilter<UnstructuredResource>> =
            Arc::new(FnFilter::named("never", |_: &UnstructuredResource, _: &UnstructuredResource| false));

        let both = AndFilter::new(yes.clone(), no);
        assert!(!both.significant(&old, &new));

        let both = AndFilter::new(yes.clone(), yes);
        assert!(both.significant(&old, &new));
    }

    #[test]
    fn test_compose_empty_is_passthrough() {
        let (old, new) = versions(1, 1);
        let composed = compose::<UnstructuredResource>(Vec::new());
        assert!(composed.significant(&old, &new));
    }

    #[test]
    fn test_compose_folds_with_and() {
        let (old, new) = versions(1, 2);
        let filters: Vec<Arc<dyn EventFilter<UnstructuredResource>>> = vec![
            Arc::new(PassthroughFilter),
            Arc::new(GenerationAwareFilter),
            Arc::new(FnFilter::new(|_: &UnstructuredResource, _: &UnstructuredResource| false)),
        ];
        let composed = compose(filters);
        assert!(!composed.significant(&old, &new));
    }

    #[test]
    fn test_panicking_filter_fails_open() {
        let (old, new) = versions(1, 1);
        let identity = old.identity();
        let broken: Arc<dyn EventFilter<UnstructuredResource>> = Arc::new(FnFilter::named(
            "broken",
            |_: &UnstructuredResource, _: &UnstructuredResource| panic!("filter bug"),
        ));

        assert!(evaluate_fail_open(&broken, &identity, &old, &new));
    }
}
