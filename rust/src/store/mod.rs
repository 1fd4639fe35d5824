//! Versioned dispatch engine.
//!
//! A [`Store`] holds one immutable state snapshot behind an `Arc`. All mutation happens
//! inside a named dispatch: an async effect that reads the state, awaits whatever it
//! needs, and commits a replacement through [`DispatchCtx::set_state`]. Every dispatch
//! gets a generation number from a wrapping counter, and an in-flight counter tracks how
//! many dispatches have not yet been observed by the rendering layer.
//!
//! Rendering layers subscribe with a [`StoreListener`] and receive state changes plus two
//! deferred queues (effects and layout effects). See [`RenderBinding`] for the queue
//! implementation used by the coordinator and tests.

mod render;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

pub use render::RenderBinding;

/// Generation counter wraps to 0 when it reaches this value.
const GENERATION_WRAP: u64 = u64::MAX - 1;

pub struct Snapshot<S> {
    pub version: u64,
    pub state: Arc<S>,
}

impl<S> Clone for Snapshot<S> {
    fn clone(&self) -> Self {
        Self {
            version: self.version,
            state: self.state.clone(),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for Snapshot<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("version", &self.version)
            .field("state", &self.state)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnDispatchParameters<'a> {
    pub currently_dispatched_counter: usize,
    pub incrementing_dispatched_counter: u64,
    pub name: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeforeSetStateParameters<'a> {
    pub currently_dispatched_counter: usize,
    pub incrementing_dispatched_counter: u64,
    pub your_incrementing_dispatched_counter: u64,
    pub name: &'a str,
}

pub type OnDispatchCheck = fn(&OnDispatchParameters<'_>) -> bool;
pub type BeforeSetStateCheck = fn(&BeforeSetStateParameters<'_>) -> bool;

/// Drop the dispatch if any other dispatch is still in flight.
pub fn only_dispatch_if_currently_dispatched_counter_equals_zero(
    params: &OnDispatchParameters<'_>,
) -> bool {
    params.currently_dispatched_counter == 0
}

/// Discard the commit if another dispatch started after this one.
pub fn only_set_state_if_incrementing_dispatched_counter_didnt_increase(
    params: &BeforeSetStateParameters<'_>,
) -> bool {
    params.incrementing_dispatched_counter == params.your_incrementing_dispatched_counter
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The on-dispatch check refused to start the effect.
    Rejected,
    Committed,
    /// The effect finished without replacing the state.
    Unchanged,
    /// A commit was discarded because the state or generation moved on.
    Stale,
    /// The effect returned an error. Logged, never re-raised.
    Failed,
}

impl DispatchOutcome {
    pub fn is_committed(self) -> bool {
        self == DispatchOutcome::Committed
    }
}

#[derive(Clone)]
pub struct DeferredFn(Arc<dyn Fn() + Send + Sync>);

impl DeferredFn {
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self) {
        (self.0)()
    }
}

impl fmt::Debug for DeferredFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeferredFn")
    }
}

/// Decrements the in-flight counter for one dispatch, at most once no matter how many
/// listeners or code paths redeem it.
#[derive(Clone)]
pub struct DispatchTicket {
    generation: u64,
    redeemed: Arc<AtomicBool>,
    counter: Arc<AtomicUsize>,
}

impl DispatchTicket {
    fn new(generation: u64, counter: Arc<AtomicUsize>) -> Self {
        Self {
            generation,
            redeemed: Arc::new(AtomicBool::new(false)),
            counter,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns true if this call performed the decrement.
    pub fn redeem(&self) -> bool {
        if self.redeemed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self
            .counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        true
    }

    pub fn is_redeemed(&self) -> bool {
        self.redeemed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for DispatchTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTicket")
            .field("generation", &self.generation)
            .field("redeemed", &self.is_redeemed())
            .finish()
    }
}

/// Entry of the effect and layout-effect queues.
#[derive(Debug, Clone)]
pub enum Deferred<A> {
    Action(A),
    Callback(DeferredFn),
    DecreaseCurrentlyDispatchedCounter(DispatchTicket),
}

impl<A> Deferred<A> {
    pub fn callback(f: impl Fn() + Send + Sync + 'static) -> Self {
        Deferred::Callback(DeferredFn::new(f))
    }
}

pub trait StoreListener<S, A>: Send + Sync {
    fn on_state_change(&self, snapshot: &Snapshot<S>);
    fn on_force_trigger_effect(&self);
    fn on_push_effect(&self, effect: Deferred<A>);
    fn on_push_layout_effect(&self, effect: Deferred<A>);
}

/// Unsubscribes its listener when dropped.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

struct Inner<S, A> {
    state: Arc<S>,
    version: u64,
    incrementing_dispatched_counter: u64,
    listeners: Vec<(u64, Arc<dyn StoreListener<S, A>>)>,
    next_listener_id: u64,
}

pub struct Store<S, A> {
    name: &'static str,
    inner: Arc<Mutex<Inner<S, A>>>,
    currently_dispatched: Arc<AtomicUsize>,
}

impl<S, A> Clone for Store<S, A> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inner: self.inner.clone(),
            currently_dispatched: self.currently_dispatched.clone(),
        }
    }
}

fn next_generation(current: u64) -> u64 {
    let next = current + 1;
    if next >= GENERATION_WRAP {
        0
    } else {
        next
    }
}

/// True when `candidate` was handed out after `than`, accounting for the counter wrapping
/// at `GENERATION_WRAP`. Generations more than half the range apart are treated as older.
pub fn generation_is_newer(candidate: u64, than: u64) -> bool {
    let distance = if candidate >= than {
        candidate - than
    } else {
        GENERATION_WRAP - than + candidate
    };
    distance != 0 && distance < GENERATION_WRAP / 2
}

impl<S, A> Store<S, A>
where
    S: Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, initial: S) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(Inner {
                state: Arc::new(initial),
                version: 0,
                incrementing_dispatched_counter: 0,
                listeners: Vec::new(),
                next_listener_id: 0,
            })),
            currently_dispatched: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<S, A>> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> Arc<S> {
        self.lock().state.clone()
    }

    pub fn snapshot(&self) -> Snapshot<S> {
        let g = self.lock();
        Snapshot {
            version: g.version,
            state: g.state.clone(),
        }
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }

    pub fn currently_dispatched_counter(&self) -> usize {
        self.currently_dispatched.load(Ordering::SeqCst)
    }

    pub fn incrementing_dispatched_counter(&self) -> u64 {
        self.lock().incrementing_dispatched_counter
    }

    pub fn subscribe(&self, listener: Arc<dyn StoreListener<S, A>>) -> Subscription {
        let id = {
            let mut g = self.lock();
            let id = g.next_listener_id;
            g.next_listener_id += 1;
            g.listeners.push((id, listener));
            id
        };
        let weak: Weak<Mutex<Inner<S, A>>> = Arc::downgrade(&self.inner);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let mut g = match inner.lock() {
                        Ok(g) => g,
                        Err(poison) => poison.into_inner(),
                    };
                    g.listeners.retain(|(lid, _)| *lid != id);
                }
            })),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    fn listeners(&self) -> Vec<Arc<dyn StoreListener<S, A>>> {
        self.lock().listeners.iter().map(|(_, l)| l.clone()).collect()
    }

    pub fn push_effect(&self, effect: Deferred<A>, force_update: bool) {
        let listeners = self.listeners();
        for l in &listeners {
            l.on_push_effect(effect.clone());
        }
        if force_update {
            for l in &listeners {
                l.on_force_trigger_effect();
            }
        }
    }

    pub fn push_layout_effect(&self, effect: Deferred<A>, force_update: bool) {
        let listeners = self.listeners();
        for l in &listeners {
            l.on_push_layout_effect(effect.clone());
        }
        if force_update {
            for l in &listeners {
                l.on_force_trigger_effect();
            }
        }
    }

    /// Run `effect` as a named dispatch.
    ///
    /// `on_dispatch_check` runs before the counters move; refusing it skips the effect
    /// entirely. `before_set_state_check` runs on every commit attempt. Errors from the
    /// effect are logged and reported as [`DispatchOutcome::Failed`].
    pub async fn dispatch<F, Fut>(
        &self,
        name: &'static str,
        effect: F,
        on_dispatch_check: Option<OnDispatchCheck>,
        before_set_state_check: Option<BeforeSetStateCheck>,
    ) -> DispatchOutcome
    where
        F: FnOnce(DispatchCtx<S, A>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        tracing::debug!(store = self.name, dispatch = name, "dispatch");
        let (generation, snapshot) = {
            let mut g = self.lock();
            if let Some(check) = on_dispatch_check {
                let params = OnDispatchParameters {
                    currently_dispatched_counter: self.currently_dispatched_counter(),
                    incrementing_dispatched_counter: g.incrementing_dispatched_counter,
                    name,
                };
                if !check(&params) {
                    tracing::debug!(
                        store = self.name,
                        dispatch = name,
                        currently_dispatched = params.currently_dispatched_counter,
                        "dispatch aborted by on-dispatch check"
                    );
                    return DispatchOutcome::Rejected;
                }
            }
            g.incrementing_dispatched_counter = next_generation(g.incrementing_dispatched_counter);
            self.currently_dispatched.fetch_add(1, Ordering::SeqCst);
            (
                g.incrementing_dispatched_counter,
                Snapshot {
                    version: g.version,
                    state: g.state.clone(),
                },
            )
        };

        let ticket = DispatchTicket::new(generation, self.currently_dispatched.clone());
        let recorded = Arc::new(Mutex::new(None));
        let ctx = DispatchCtx {
            store: self.clone(),
            name,
            generation,
            snapshot,
            before_set_state_check,
            ticket: ticket.clone(),
            recorded: recorded.clone(),
        };

        let result = effect(ctx).await;
        let recorded = match recorded.lock() {
            Ok(mut g) => g.take(),
            Err(poison) => poison.into_inner().take(),
        };
        if recorded != Some(DispatchOutcome::Committed) {
            ticket.redeem();
        }

        match result {
            Ok(()) => recorded.unwrap_or(DispatchOutcome::Unchanged),
            Err(e) => {
                tracing::error!(store = self.name, dispatch = name, generation, err = %format!("{e:#}"), "dispatch failed");
                DispatchOutcome::Failed
            }
        }
    }

    fn commit(
        &self,
        name: &'static str,
        generation: u64,
        expected_version: Option<u64>,
        new_state: Arc<S>,
        before_set_state_check: Option<BeforeSetStateCheck>,
        ticket: &DispatchTicket,
    ) -> DispatchOutcome {
        let (snapshot, listeners) = {
            let mut g = self.lock();
            if Arc::ptr_eq(&g.state, &new_state) {
                drop(g);
                ticket.redeem();
                tracing::debug!(store = self.name, dispatch = name, "dispatch didn't change the state");
                return DispatchOutcome::Unchanged;
            }
            if let Some(expected) = expected_version {
                if g.version != expected {
                    let live = g.version;
                    drop(g);
                    ticket.redeem();
                    tracing::debug!(
                        store = self.name,
                        dispatch = name,
                        expected,
                        live,
                        "stale commit dropped, state version moved"
                    );
                    return DispatchOutcome::Stale;
                }
            }
            if let Some(check) = before_set_state_check {
                let params = BeforeSetStateParameters {
                    currently_dispatched_counter: self.currently_dispatched_counter(),
                    incrementing_dispatched_counter: g.incrementing_dispatched_counter,
                    your_incrementing_dispatched_counter: generation,
                    name,
                };
                if !check(&params) {
                    drop(g);
                    ticket.redeem();
                    tracing::debug!(
                        store = self.name,
                        dispatch = name,
                        generation,
                        live = params.incrementing_dispatched_counter,
                        "stale commit dropped by before-set-state check"
                    );
                    return DispatchOutcome::Stale;
                }
            }
            g.state = new_state;
            g.version += 1;
            let snapshot = Snapshot {
                version: g.version,
                state: g.state.clone(),
            };
            let listeners: Vec<_> = g.listeners.iter().map(|(_, l)| l.clone()).collect();
            (snapshot, listeners)
        };

        if listeners.is_empty() {
            ticket.redeem();
        } else if !ticket.is_redeemed() {
            for l in &listeners {
                l.on_push_effect(Deferred::DecreaseCurrentlyDispatchedCounter(ticket.clone()));
            }
        }
        for l in &listeners {
            l.on_state_change(&snapshot);
        }
        tracing::debug!(store = self.name, dispatch = name, version = snapshot.version, "state committed");
        DispatchOutcome::Committed
    }
}

/// Handle passed to a dispatch effect.
pub struct DispatchCtx<S, A> {
    store: Store<S, A>,
    name: &'static str,
    generation: u64,
    snapshot: Snapshot<S>,
    before_set_state_check: Option<BeforeSetStateCheck>,
    ticket: DispatchTicket,
    recorded: Arc<Mutex<Option<DispatchOutcome>>>,
}

impl<S, A> Clone for DispatchCtx<S, A> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            name: self.name,
            generation: self.generation,
            snapshot: self.snapshot.clone(),
            before_set_state_check: self.before_set_state_check,
            ticket: self.ticket.clone(),
            recorded: self.recorded.clone(),
        }
    }
}

impl<S, A> DispatchCtx<S, A>
where
    S: Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// State as it was when the dispatch started.
    pub fn state(&self) -> &Arc<S> {
        &self.snapshot.state
    }

    pub fn snapshot(&self) -> &Snapshot<S> {
        &self.snapshot
    }

    /// Latest committed state, which may differ from [`DispatchCtx::state`] after an await.
    pub fn current(&self) -> Arc<S> {
        self.store.state()
    }

    pub fn current_snapshot(&self) -> Snapshot<S> {
        self.store.snapshot()
    }

    /// True once a newer dispatch has started.
    pub fn is_superseded(&self) -> bool {
        self.store.incrementing_dispatched_counter() != self.generation
    }

    pub fn store(&self) -> &Store<S, A> {
        &self.store
    }

    pub fn set_state(&self, new_state: Arc<S>) -> DispatchOutcome {
        self.commit(None, new_state)
    }

    /// Commit only if the live state is still the one `read` was taken from.
    pub fn set_state_from(&self, read: &Snapshot<S>, new_state: Arc<S>) -> DispatchOutcome {
        self.commit(Some(read.version), new_state)
    }

    /// Report the dispatch as [`DispatchOutcome::Stale`] when the effect drops its own
    /// result. A commit already made by this dispatch is kept.
    pub fn mark_stale(&self) {
        let mut recorded = match self.recorded.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        if *recorded != Some(DispatchOutcome::Committed) {
            *recorded = Some(DispatchOutcome::Stale);
        }
    }

    pub fn push_effect(&self, action: A) {
        self.store.push_effect(Deferred::Action(action), false);
    }

    pub fn push_layout_effect(&self, action: A) {
        self.store.push_layout_effect(Deferred::Action(action), false);
    }

    fn commit(&self, expected_version: Option<u64>, new_state: Arc<S>) -> DispatchOutcome {
        let outcome = self.store.commit(
            self.name,
            self.generation,
            expected_version,
            new_state,
            self.before_set_state_check,
            &self.ticket,
        );
        let mut recorded = match self.recorded.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        if *recorded != Some(DispatchOutcome::Committed) {
            *recorded = Some(outcome);
        }
        outcome
    }
}
