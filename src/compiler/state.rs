//! Shared state for transforms that look beyond a single method.
//!
//! The inliner needs the bodies of the methods it calls. Those bodies come from a
//! [`BodyProvider`] and are memoized in an [`OptimizationState`], which is shared by every
//! method being optimized. Each callee is fetched at most once, even when many callers ask
//! for it concurrently: requests for the same method wait on the same cell.
//!
//! # Example
//!
//! ```rust
//! use flowscope::compiler::{BodyProvider, OptimizationState};
//! use flowscope::ir::{MethodBody, MethodDef, MethodRef, Type};
//!
//! struct NoBodies;
//!
//! impl BodyProvider for NoBodies {
//!     fn fetch_body(&self, _method: &MethodRef) -> flowscope::Result<Option<MethodBody>> {
//!         Ok(None)
//!     }
//! }
//!
//! let state = OptimizationState::new(NoBodies);
//! let callee = MethodDef::new("f", "app", Vec::new(), Type::Void).into_ref();
//! let bodies = state.request_bodies([&callee]).wait().unwrap();
//! assert!(bodies[&callee].is_none());
//! ```

use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
};

use dashmap::DashMap;
use rayon::prelude::*;

use crate::{
    compiler::EventLog,
    ir::{MethodBody, MethodRef},
    Error, Result,
};

/// Supplies method bodies on demand.
///
/// This is the optimizer's view of whatever owns the program: a front end, a cache of
/// already optimized methods, or a test fixture.
pub trait BodyProvider: Send + Sync {
    /// Returns the body of `method`, or `None` if it has none (abstract, external, or
    /// simply unknown).
    ///
    /// # Errors
    ///
    /// Any error is reported to the requester as [`Error::BodyProvider`].
    fn fetch_body(&self, method: &MethodRef) -> Result<Option<MethodBody>>;
}

type FetchOutcome = std::result::Result<Option<MethodBody>, String>;
type BodyCell = Arc<OnceLock<FetchOutcome>>;

/// Memoized callee bodies plus the event log shared by all transforms.
pub struct OptimizationState {
    provider: Arc<dyn BodyProvider>,
    bodies: DashMap<MethodRef, BodyCell>,
    events: EventLog,
}

impl OptimizationState {
    /// Creates a state backed by `provider`.
    #[must_use]
    pub fn new(provider: impl BodyProvider + 'static) -> Self {
        Self::with_provider(Arc::new(provider))
    }

    /// Creates a state backed by a shared provider.
    #[must_use]
    pub fn with_provider(provider: Arc<dyn BodyProvider>) -> Self {
        Self {
            provider,
            bodies: DashMap::new(),
            events: EventLog::new(),
        }
    }

    /// The log all transforms running against this state record into.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Starts a batch request for the bodies of `methods`.
    ///
    /// Nothing is fetched until [`BodyRequest::wait`] is called.
    pub fn request_bodies<'a>(
        &self,
        methods: impl IntoIterator<Item = &'a MethodRef>,
    ) -> BodyRequest<'_> {
        let mut cells: Vec<(MethodRef, BodyCell)> = Vec::new();
        for method in methods {
            if cells.iter().any(|(m, _)| m == method) {
                continue;
            }
            let cell = self
                .bodies
                .entry(method.clone())
                .or_insert_with(|| Arc::new(OnceLock::new()))
                .value()
                .clone();
            cells.push((method.clone(), cell));
        }
        BodyRequest { state: self, cells }
    }

    /// Replaces the cached body of `method`.
    ///
    /// Requests started afterwards observe `body`; requests already holding the old cell
    /// keep seeing the old body.
    pub fn publish(&self, method: &MethodRef, body: MethodBody) {
        self.bodies
            .insert(method.clone(), Arc::new(OnceLock::from(Ok(Some(body)))));
    }

    /// Number of methods whose body has been fetched or published.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.bodies
            .iter()
            .filter(|entry| entry.value().get().is_some())
            .count()
    }

    fn fetch(&self, method: &MethodRef) -> FetchOutcome {
        self.provider.fetch_body(method).map_err(|error| match error {
            Error::BodyProvider(message) => message,
            other => other.to_string(),
        })
    }
}

/// A pending batch of body fetches. See [`OptimizationState::request_bodies`].
pub struct BodyRequest<'a> {
    state: &'a OptimizationState,
    cells: Vec<(MethodRef, BodyCell)>,
}

impl BodyRequest<'_> {
    /// The requested methods.
    pub fn methods(&self) -> impl Iterator<Item = &MethodRef> {
        self.cells.iter().map(|(method, _)| method)
    }

    /// Resolves every requested body, fetching missing ones in parallel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BodyProvider`] for the first failed fetch. Failures are memoized
    /// like successes, so a failing method is not retried.
    pub fn wait(self) -> Result<HashMap<MethodRef, Option<MethodBody>>> {
        let state = self.state;
        self.cells
            .par_iter()
            .map(|(method, cell)| {
                let outcome = cell.get_or_init(|| state.fetch(method));
                match outcome {
                    Ok(body) => Ok((method.clone(), body.clone())),
                    Err(message) => Err(Error::BodyProvider(message.clone())),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::ir::{BlockFlow, FlowGraphBuilder, MethodDef, Type};

    struct Counting {
        fetches: Arc<AtomicUsize>,
        known: MethodRef,
    }

    impl BodyProvider for Counting {
        fn fetch_body(&self, method: &MethodRef) -> Result<Option<MethodBody>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if method.name() == "broken" {
                return Err(Error::BodyProvider("cannot load broken".into()));
            }
            if *method != self.known {
                return Ok(None);
            }
            let mut builder = FlowGraphBuilder::new();
            let entry = builder.entry_point().clone();
            builder.set_flow(&entry, BlockFlow::Unreachable);
            Ok(Some(MethodBody::for_method(method, builder.to_immutable())))
        }
    }

    fn method(name: &str) -> MethodRef {
        MethodDef::new(name, "app", Vec::new(), Type::Void).into_ref()
    }

    #[test]
    fn test_each_body_is_fetched_once() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let known = method("known");
        let other = method("other");
        let state = OptimizationState::new(Counting {
            fetches: fetches.clone(),
            known: known.clone(),
        });

        (0..8).into_par_iter().for_each(|_| {
            let bodies = state.request_bodies([&known, &other, &known]).wait().unwrap();
            assert!(bodies[&known].is_some());
            assert!(bodies[&other].is_none());
        });
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        assert_eq!(state.cached_count(), 2);
    }

    #[test]
    fn test_failures_are_reported_and_memoized() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let broken = method("broken");
        let state = OptimizationState::new(Counting {
            fetches: fetches.clone(),
            known: method("known"),
        });

        let first = state.request_bodies([&broken]).wait();
        assert!(matches!(first, Err(Error::BodyProvider(ref m)) if m == "cannot load broken"));
        assert!(state.request_bodies([&broken]).wait().is_err());
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_publish_replaces_cached_body() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let target = method("target");
        let state = OptimizationState::new(Counting {
            fetches: fetches.clone(),
            known: method("known"),
        });
        assert!(state.request_bodies([&target]).wait().unwrap()[&target].is_none());

        let body = MethodBody::for_method(&target, FlowGraphBuilder::new().to_immutable());
        state.publish(&target, body.clone());
        let bodies = state.request_bodies([&target]).wait().unwrap();
        assert_eq!(bodies[&target].as_ref(), Some(&body));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }
}
