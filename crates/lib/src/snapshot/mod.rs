//! Lazily recomputed values with batched change notification.
//!
//! A [`Source`] holds a value that is set from outside (a room sets one with
//! its storage projection after every modifying batch). A [`Cache`] derives a
//! value from other sources or caches and recomputes it only when read after
//! one of its dependencies changed.
//!
//! Invalidation propagates eagerly through the dependency graph, but only as
//! a cleared flag: nothing recomputes until someone asks for the value.
//! Subscribers of a source or cache are notified at most once per
//! [`Scope::batch`], however many times it was invalidated inside.
//!
//! Everything here is single-threaded (`Rc`), matching the room itself.

use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use tracing::trace;

/// Groups invalidations so subscribers hear about them once.
#[derive(Clone, Default)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

#[derive(Default)]
struct ScopeInner {
    depth: Cell<usize>,
    queue: RefCell<Vec<Rc<dyn Notify>>>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f`, delaying subscriber notification until the outermost batch
    /// returns.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.depth.set(self.inner.depth.get() + 1);
        let result = f();
        self.inner.depth.set(self.inner.depth.get() - 1);
        if self.inner.depth.get() == 0 {
            self.flush();
        }
        result
    }

    pub fn is_batching(&self) -> bool {
        self.inner.depth.get() > 0
    }

    fn schedule(&self, target: Rc<dyn Notify>) {
        if self.is_batching() {
            self.inner.queue.borrow_mut().push(target);
        } else {
            target.notify();
        }
    }

    fn flush(&self) {
        loop {
            let queued = std::mem::take(&mut *self.inner.queue.borrow_mut());
            if queued.is_empty() {
                break;
            }
            trace!(count = queued.len(), "Notifying snapshot subscribers");
            for target in queued {
                target.notify();
            }
        }
    }
}

/// Identifies a subscription for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

trait Notify {
    fn notify(&self);
}

/// Something a [`Cache`] can be derived from.
pub trait Dependency {
    #[doc(hidden)]
    fn add_dependent(&self, dependent: Weak<dyn Invalidate>);
}

/// Receives invalidation from a dependency.
#[doc(hidden)]
pub trait Invalidate {
    fn invalidate(&self);
}

#[derive(Default)]
struct Listeners {
    next_id: Cell<u64>,
    entries: RefCell<Vec<(SubscriberId, Rc<dyn Fn()>)>>,
    queued: Cell<bool>,
}

impl Listeners {
    fn add(&self, callback: Rc<dyn Fn()>) -> SubscriberId {
        let id = SubscriberId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.entries.borrow_mut().push((id, callback));
        id
    }

    fn remove(&self, id: SubscriberId) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    /// Marks a notification as due; false if one is already queued or no one listens.
    fn claim(&self) -> bool {
        if self.entries.borrow().is_empty() || self.queued.get() {
            return false;
        }
        self.queued.set(true);
        true
    }

    fn call_all(&self) {
        self.queued.set(false);
        // Callbacks may subscribe or unsubscribe.
        let callbacks: Vec<_> = self
            .entries
            .borrow()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback();
        }
    }
}

#[derive(Default)]
struct Dependents(RefCell<Vec<Weak<dyn Invalidate>>>);

impl Dependents {
    fn add(&self, dependent: Weak<dyn Invalidate>) {
        self.0.borrow_mut().push(dependent);
    }

    fn invalidate_all(&self) {
        let live: Vec<_> = {
            let mut dependents = self.0.borrow_mut();
            dependents.retain(|d| d.strong_count() > 0);
            dependents.iter().filter_map(Weak::upgrade).collect()
        };
        for dependent in live {
            dependent.invalidate();
        }
    }
}

/// A settable value.
pub struct Source<T> {
    inner: Rc<SourceInner<T>>,
}

struct SourceInner<T> {
    me: Weak<SourceInner<T>>,
    scope: Scope,
    value: RefCell<T>,
    listeners: Listeners,
    dependents: Dependents,
}

impl<T: Clone + 'static> Source<T> {
    pub fn new(scope: &Scope, value: T) -> Self {
        let inner = Rc::new_cyclic(|me| SourceInner {
            me: me.clone(),
            scope: scope.clone(),
            value: RefCell::new(value),
            listeners: Listeners::default(),
            dependents: Dependents::default(),
        });
        Self { inner }
    }

    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Replaces the value and invalidates everything derived from it.
    pub fn set(&self, value: T) {
        *self.inner.value.borrow_mut() = value;
        self.inner.dependents.invalidate_all();
        if self.inner.listeners.claim()
            && let Some(me) = self.inner.me.upgrade()
        {
            self.inner.scope.schedule(me);
        }
    }

    pub fn subscribe(&self, callback: impl Fn() + 'static) -> SubscriberId {
        self.inner.listeners.add(Rc::new(callback))
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.listeners.remove(id)
    }
}

impl<T> Clone for Source<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Notify for SourceInner<T> {
    fn notify(&self) {
        self.listeners.call_all();
    }
}

impl<T: 'static> Dependency for Source<T> {
    fn add_dependent(&self, dependent: Weak<dyn Invalidate>) {
        self.inner.dependents.add(dependent);
    }
}

/// A derived value, computed on first read and cached until invalidated.
pub struct Cache<T> {
    inner: Rc<CacheInner<T>>,
}

struct CacheInner<T> {
    me: Weak<CacheInner<T>>,
    scope: Scope,
    compute: Box<dyn Fn() -> T>,
    value: RefCell<Option<T>>,
    computations: Cell<u64>,
    listeners: Listeners,
    dependents: Dependents,
}

impl<T: Clone + 'static> Cache<T> {
    /// A cache with no tracked dependencies; invalidate it by hand.
    pub fn new(scope: &Scope, compute: impl Fn() -> T + 'static) -> Self {
        let inner = Rc::new_cyclic(|me| CacheInner {
            me: me.clone(),
            scope: scope.clone(),
            compute: Box::new(compute),
            value: RefCell::new(None),
            computations: Cell::new(0),
            listeners: Listeners::default(),
            dependents: Dependents::default(),
        });
        Self { inner }
    }

    /// A cache invalidated whenever any of `dependencies` changes.
    pub fn derived(
        scope: &Scope,
        dependencies: &[&dyn Dependency],
        compute: impl Fn() -> T + 'static,
    ) -> Self {
        let cache = Self::new(scope, compute);
        for dependency in dependencies {
            let weak: Weak<dyn Invalidate> = Rc::downgrade(&cache.inner) as Weak<dyn Invalidate>;
            dependency.add_dependent(weak);
        }
        cache
    }

    /// The current value, recomputed if stale.
    pub fn get(&self) -> T {
        if let Some(value) = self.inner.value.borrow().as_ref() {
            return value.clone();
        }
        let value = (self.inner.compute)();
        self.inner.computations.set(self.inner.computations.get() + 1);
        *self.inner.value.borrow_mut() = Some(value.clone());
        value
    }

    pub fn invalidate(&self) {
        self.inner.invalidate();
    }

    /// True while the last computed value is still valid.
    pub fn is_fresh(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// How many times the value has been computed.
    pub fn computations(&self) -> u64 {
        self.inner.computations.get()
    }

    pub fn subscribe(&self, callback: impl Fn() + 'static) -> SubscriberId {
        self.inner.listeners.add(Rc::new(callback))
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.listeners.remove(id)
    }
}

impl<T> Clone for Cache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Invalidate for CacheInner<T> {
    fn invalidate(&self) {
        self.value.borrow_mut().take();
        self.dependents.invalidate_all();
        if self.listeners.claim()
            && let Some(me) = self.me.upgrade()
        {
            self.scope.schedule(me);
        }
    }
}

impl<T: 'static> Notify for CacheInner<T> {
    fn notify(&self) {
        self.listeners.call_all();
    }
}

impl<T: 'static> Dependency for Cache<T> {
    fn add_dependent(&self, dependent: Weak<dyn Invalidate>) {
        self.inner.dependents.add(dependent);
    }
}
