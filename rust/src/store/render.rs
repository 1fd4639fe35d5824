use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Deferred, Snapshot, Store, StoreListener, Subscription};

struct Queues<S, A> {
    latest: Option<Snapshot<S>>,
    needs_render: bool,
    force_triggered: bool,
    effects: VecDeque<Deferred<A>>,
    layout_effects: VecDeque<Deferred<A>>,
}

struct SharedQueues<S, A> {
    inner: Mutex<Queues<S, A>>,
}

impl<S, A> SharedQueues<S, A> {
    fn lock(&self) -> MutexGuard<'_, Queues<S, A>> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }
}

impl<S, A> StoreListener<S, A> for SharedQueues<S, A>
where
    S: Send + Sync,
    A: Send + Sync,
{
    fn on_state_change(&self, snapshot: &Snapshot<S>) {
        let mut q = self.lock();
        q.latest = Some(snapshot.clone());
        q.needs_render = true;
    }

    fn on_force_trigger_effect(&self) {
        self.lock().force_triggered = true;
    }

    fn on_push_effect(&self, effect: Deferred<A>) {
        self.lock().effects.push_back(effect);
    }

    fn on_push_layout_effect(&self, effect: Deferred<A>) {
        self.lock().layout_effects.push_back(effect);
    }
}

/// Render-side view of a [`Store`]: the latest committed snapshot plus the two deferred
/// queues. A rendering layer calls [`RenderBinding::take_render`], applies the snapshot,
/// then drains layout effects (before paint) and effects (after paint), in that order.
pub struct RenderBinding<S, A> {
    store: Store<S, A>,
    queues: Arc<SharedQueues<S, A>>,
    _subscription: Subscription,
}

impl<S, A> RenderBinding<S, A>
where
    S: Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    pub fn new(store: &Store<S, A>) -> Self {
        let queues = Arc::new(SharedQueues {
            inner: Mutex::new(Queues {
                latest: None,
                needs_render: false,
                force_triggered: false,
                effects: VecDeque::new(),
                layout_effects: VecDeque::new(),
            }),
        });
        let subscription = store.subscribe(queues.clone());
        Self {
            store: store.clone(),
            queues,
            _subscription: subscription,
        }
    }

    pub fn state(&self) -> Arc<S> {
        self.store.state()
    }

    pub fn needs_render(&self) -> bool {
        let q = self.queues.lock();
        q.needs_render || q.force_triggered
    }

    /// Snapshot to render, if a commit or a forced trigger happened since the last call.
    pub fn take_render(&self) -> Option<Snapshot<S>> {
        let mut q = self.queues.lock();
        if !q.needs_render && !q.force_triggered {
            return None;
        }
        q.needs_render = false;
        q.force_triggered = false;
        let latest = q.latest.take();
        drop(q);
        Some(latest.unwrap_or_else(|| self.store.snapshot()))
    }

    /// Run queued layout callbacks and return the queued layout actions, oldest first.
    pub fn drain_layout_effects(&self) -> Vec<A> {
        let drained: Vec<_> = self.queues.lock().layout_effects.drain(..).collect();
        run_deferred(drained)
    }

    /// Run queued callbacks, settle in-flight counters and return queued actions, oldest
    /// first.
    pub fn drain_effects(&self) -> Vec<A> {
        let drained: Vec<_> = self.queues.lock().effects.drain(..).collect();
        run_deferred(drained)
    }

    /// Redeem pending counter decrements without running anything else. Returns how many
    /// dispatches were settled.
    pub fn settle_dispatch_counters(&self) -> usize {
        let tickets: Vec<_> = {
            let mut q = self.queues.lock();
            let mut tickets = Vec::new();
            q.effects.retain(|e| match e {
                Deferred::DecreaseCurrentlyDispatchedCounter(t) => {
                    tickets.push(t.clone());
                    false
                }
                _ => true,
            });
            tickets
        };
        tickets.iter().filter(|t| t.redeem()).count()
    }

    pub fn has_pending_work(&self) -> bool {
        let q = self.queues.lock();
        q.needs_render || q.force_triggered || !q.effects.is_empty() || !q.layout_effects.is_empty()
    }
}

fn run_deferred<A>(drained: Vec<Deferred<A>>) -> Vec<A> {
    let mut actions = Vec::new();
    for deferred in drained {
        match deferred {
            Deferred::Action(a) => actions.push(a),
            Deferred::Callback(f) => f.call(),
            Deferred::DecreaseCurrentlyDispatchedCounter(ticket) => {
                ticket.redeem();
            }
        }
    }
    actions
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn render_pass_drains_layout_then_effects_in_order() {
        let store: Store<Vec<u32>, &'static str> = Store::new("render", Vec::new());
        let binding = RenderBinding::new(&store);
        assert!(!binding.needs_render());

        store
            .dispatch(
                "push",
                |ctx| async move {
                    ctx.push_layout_effect("first");
                    ctx.push_layout_effect("second");
                    ctx.push_effect("after-paint");
                    ctx.set_state(Arc::new(vec![1]));
                    Ok(())
                },
                None,
                None,
            )
            .await;

        assert_eq!(store.currently_dispatched_counter(), 1);
        let snapshot = binding.take_render().expect("a commit happened");
        assert_eq!(*snapshot.state, vec![1]);
        assert!(binding.take_render().is_none());

        assert_eq!(binding.drain_layout_effects(), vec!["first", "second"]);
        assert_eq!(binding.drain_effects(), vec!["after-paint"]);
        assert_eq!(store.currently_dispatched_counter(), 0);
        assert!(!binding.has_pending_work());
    }

    #[tokio::test]
    async fn settle_only_touches_counter_tickets() {
        let store: Store<u32, &'static str> = Store::new("render", 0);
        let binding = RenderBinding::new(&store);
        store
            .dispatch(
                "bump",
                |ctx| async move {
                    ctx.push_effect("keep");
                    ctx.set_state(Arc::new(1));
                    Ok(())
                },
                None,
                None,
            )
            .await;

        assert_eq!(binding.settle_dispatch_counters(), 1);
        assert_eq!(store.currently_dispatched_counter(), 0);
        assert_eq!(binding.drain_effects(), vec!["keep"]);
    }

    #[test]
    fn callbacks_run_when_drained() {
        let store: Store<u32, &'static str> = Store::new("render", 0);
        let binding = RenderBinding::new(&store);
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        store.push_layout_effect(
            Deferred::callback(move || {
                hits2.fetch_add(1, Ordering::SeqCst);
            }),
            true,
        );
        assert!(binding.needs_render());
        assert!(binding.drain_layout_effects().is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let forced = binding.take_render().expect("forced render");
        assert_eq!(forced.version, 0);
    }
}
