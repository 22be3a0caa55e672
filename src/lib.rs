//! Event-processing and reconciliation dispatch core for declarative
//! resource controllers.
//!
//! The crate turns a raw, at-least-once watch stream into disciplined
//! invocations of user reconciliation logic:
//!
//! - **Filtering**: adds and deletes always count; updates pass through
//!   composable significance filters (generation-aware by default, so a
//!   controller's own status writes do not feed back into it).
//! - **Coalescing**: events arriving while an identity is being reconciled
//!   collapse into exactly one follow-up run, bounding work under event
//!   storms.
//! - **Serialization**: at most one reconciliation runs per identity at any
//!   time, enforced by the per-identity state table rather than convention.
//! - **Finalizers**: added before the first reconcile, cleared only after
//!   cleanup succeeds, so deletion never races ahead of teardown.
//! - **Retries**: failed attempts back off exponentially with a cap and an
//!   attempt ceiling; any success resets the chain.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use helmsman::{
//!     Context, Controller, ControllerConfig, InMemoryResourceCache,
//!     InMemoryStoreClient, Outcome, Reconciler, UnstructuredResource, WatchEvent,
//! };
//!
//! struct WidgetReconciler;
//!
//! #[async_trait::async_trait]
//! impl Reconciler<UnstructuredResource> for WidgetReconciler {
//!     async fn reconcile(&self, resource: UnstructuredResource, ctx: &Context) -> Outcome {
//!         if ctx.deletion_pass {
//!             // tear down external state here
//!             return Outcome::success();
//!         }
//!         Outcome::success_with_status(serde_json::json!({"phase": "Ready"}))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> helmsman::Result<()> {
//!     let config = ControllerConfig::builder("widgets").build()?;
//!     let cache = Arc::new(InMemoryResourceCache::new());
//!     let store = Arc::new(InMemoryStoreClient::new());
//!     let controller = Controller::new(config, Arc::new(WidgetReconciler), cache, store)?;
//!
//!     let widget = UnstructuredResource::new("ns", "w1", "Widget");
//!     controller.handle_watch_event(WatchEvent::added(widget)).await;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod buffer;
pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod executor;
pub mod filter;
pub mod reconciler;
pub mod resource;
pub mod retry;
pub mod store;

// Re-export main types
pub use buffer::EventBuffer;
pub use cache::{InMemoryResourceCache, ResourceCache};
pub use config::{ControllerConfig, ControllerConfigBuilder, LabelSelector};
pub use controller::{Controller, FinalizerState, Phase};
pub use error::{Error, Result};
pub use event::{ChangeKind, Event, EventId, EventKind, WatchEvent};
pub use executor::{ReconciliationExecutor, WorkRunner};
pub use filter::{
    AndFilter, EventFilter, FnFilter, GenerationAwareFilter, PassthroughFilter,
};
pub use reconciler::{Context, Outcome, Reconciler};
pub use resource::{
    Resource, ResourceIdentity, ResourceMeta, ResourceVersion, UnstructuredResource,
};
pub use retry::{RetryPolicy, RetryState};
pub use store::{InMemoryStoreClient, StoreClient};
