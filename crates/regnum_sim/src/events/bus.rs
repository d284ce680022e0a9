//! # Event Bus
//!
//! Typed publish/subscribe with deferred delivery.
//!
//! ## Delivery Order
//!
//! ```text
//! emit()        -> appended to the queue of its type, nothing runs
//! process()     -> pass 1: snapshot queue lengths
//!                          for each type in registration order:
//!                            for each snapshotted event, FIFO:
//!                              every handler, in subscription order
//!                  pass 2: events emitted by handlers during pass 1
//!                  ...
//!                  pass N: stop when nothing is pending
//! ```
//!
//! A pass never delivers an event emitted during that same pass, so a
//! handler can never observe its own emission re-entrantly. The pass number
//! is the cascade depth. If events are still pending after `max_depth`
//! passes, processing stops with [`EventError::CascadeDepthExceeded`] and
//! the remaining events are discarded.
//!
//! ## Allocation
//!
//! Queues, in-flight batches and the pass snapshot are reused; after warm-up
//! `emit` and `process` do not allocate unless a queue outgrows its capacity.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::error::EventError;

/// Marker for types that travel on the bus.
pub trait Event: Send + 'static {}

/// Handler signature. The sink lets a handler emit follow-up events.
pub type Handler<T> = Box<dyn FnMut(&T, &mut EventSink<'_>) + Send>;

/// Cumulative bus counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventStats {
    /// Events accepted by `emit`, including handler emissions.
    pub emitted: u64,
    /// Events handed to at least one handler.
    pub delivered: u64,
    /// Events discarded because their type had no subscriber.
    pub dropped: u64,
    /// Events discarded by a cascade overflow.
    pub discarded: u64,
    /// Deepest cascade seen by any `process` call.
    pub deepest_cascade: u32,
    /// Number of `process` calls that overflowed.
    pub cascade_failures: u64,
}

/// Result of one [`EventBus::process`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessStats {
    /// Passes run.
    pub depth: u32,
    /// Events handed to at least one handler.
    pub delivered: usize,
    /// Events without subscribers.
    pub dropped: usize,
}

// ============================================================================
// TYPE-ERASED QUEUES AND ROUTES
// ============================================================================

trait Queue: Send {
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn len(&self) -> usize;
    fn clear(&mut self);
    fn new_route(&self) -> Box<dyn Route>;
}

struct Pending<T: Event> {
    events: Vec<T>,
}

impl<T: Event> Queue for Pending<T> {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn len(&self) -> usize {
        self.events.len()
    }

    fn clear(&mut self) {
        self.events.clear();
    }

    fn new_route(&self) -> Box<dyn Route> {
        Box::new(Subscribers::<T> {
            handlers: Vec::new(),
            in_flight: Vec::with_capacity(self.events.capacity()),
        })
    }
}

trait Route: Send {
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn handler_count(&self) -> usize;
    /// Moves the first `count` events of `queue` into flight.
    fn take_batch(&mut self, queue: &mut dyn Queue, count: usize);
    /// Delivers the in-flight batch. Returns (delivered, dropped).
    fn dispatch(&mut self, sink: &mut EventSink<'_>) -> (usize, usize);
}

struct Subscribers<T: Event> {
    handlers: Vec<Handler<T>>,
    in_flight: Vec<T>,
}

impl<T: Event> Route for Subscribers<T> {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    fn take_batch(&mut self, queue: &mut dyn Queue, count: usize) {
        if let Some(pending) = queue.as_any_mut().downcast_mut::<Pending<T>>() {
            self.in_flight.extend(pending.events.drain(..count));
        }
    }

    fn dispatch(&mut self, sink: &mut EventSink<'_>) -> (usize, usize) {
        let count = self.in_flight.len();
        if self.handlers.is_empty() {
            self.in_flight.clear();
            return (0, count);
        }
        let Self {
            handlers,
            in_flight,
        } = self;
        for event in in_flight.drain(..) {
            for handler in handlers.iter_mut() {
                handler(&event, sink);
            }
        }
        (count, 0)
    }
}

// ============================================================================
// SINK
// ============================================================================

/// Emission handle given to handlers during [`EventBus::process`].
///
/// Events emitted here are delivered in the next pass.
pub struct EventSink<'a> {
    channels: &'a mut Vec<Box<dyn Queue>>,
    index: &'a mut HashMap<TypeId, usize>,
    emitted: &'a mut u64,
    queue_capacity: usize,
}

impl EventSink<'_> {
    /// Queues an event for the next pass.
    pub fn emit<T: Event>(&mut self, event: T) {
        let slot = channel_slot::<T>(self.channels, self.index, self.queue_capacity);
        push(self.channels, slot, event);
        *self.emitted += 1;
    }
}

fn channel_slot<T: Event>(
    channels: &mut Vec<Box<dyn Queue>>,
    index: &mut HashMap<TypeId, usize>,
    queue_capacity: usize,
) -> usize {
    *index.entry(TypeId::of::<T>()).or_insert_with(|| {
        channels.push(Box::new(Pending::<T> {
            events: Vec::with_capacity(queue_capacity),
        }));
        channels.len() - 1
    })
}

fn push<T: Event>(channels: &mut [Box<dyn Queue>], slot: usize, event: T) {
    if let Some(pending) = channels[slot].as_any_mut().downcast_mut::<Pending<T>>() {
        pending.events.push(event);
    }
}

// ============================================================================
// BUS
// ============================================================================

/// Deferred, typed, bounded event bus.
pub struct EventBus {
    /// Pending events per type, in registration order.
    channels: Vec<Box<dyn Queue>>,
    /// Subscribers per type, parallel to `channels`.
    routes: Vec<Box<dyn Route>>,
    /// Type -> slot in `channels`/`routes`.
    index: HashMap<TypeId, usize>,
    /// Queue lengths at the start of the current pass.
    batch: Vec<usize>,
    /// Maximum passes per `process` call.
    max_depth: u32,
    /// Initial capacity of each queue.
    queue_capacity: usize,
    stats: EventStats,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("types", &self.channels.len())
            .field("pending", &self.pending())
            .field("max_depth", &self.max_depth)
            .field("stats", &self.stats)
            .finish()
    }
}

impl EventBus {
    /// Creates a bus allowing `max_depth` cascade passes per `process` call.
    #[must_use]
    pub fn new(max_depth: u32, queue_capacity: usize) -> Self {
        Self {
            channels: Vec::new(),
            routes: Vec::new(),
            index: HashMap::new(),
            batch: Vec::new(),
            max_depth: max_depth.max(1),
            queue_capacity,
            stats: EventStats::default(),
        }
    }

    /// Pre-registers an event type so its queue is allocated up front.
    pub fn register<T: Event>(&mut self) {
        channel_slot::<T>(&mut self.channels, &mut self.index, self.queue_capacity);
        self.sync_routes();
    }

    /// Adds a handler for `T`. Handlers run in subscription order.
    pub fn subscribe<T: Event>(&mut self, handler: impl FnMut(&T, &mut EventSink<'_>) + Send + 'static) {
        let slot = channel_slot::<T>(&mut self.channels, &mut self.index, self.queue_capacity);
        self.sync_routes();
        if let Some(route) = self.routes[slot].as_any_mut().downcast_mut::<Subscribers<T>>() {
            route.handlers.push(Box::new(handler));
        }
    }

    /// Queues an event. No handler runs until [`Self::process`].
    pub fn emit<T: Event>(&mut self, event: T) {
        let slot = channel_slot::<T>(&mut self.channels, &mut self.index, self.queue_capacity);
        push(&mut self.channels, slot, event);
        self.stats.emitted += 1;
    }

    /// Queues several events of one type, preserving their order.
    pub fn emit_batch<T: Event>(&mut self, events: impl IntoIterator<Item = T>) {
        let slot = channel_slot::<T>(&mut self.channels, &mut self.index, self.queue_capacity);
        if let Some(pending) = self.channels[slot].as_any_mut().downcast_mut::<Pending<T>>() {
            let before = pending.events.len();
            pending.events.extend(events);
            self.stats.emitted += (pending.events.len() - before) as u64;
        }
    }

    /// Number of handlers for `T`.
    #[must_use]
    pub fn subscriber_count<T: Event>(&self) -> usize {
        self.index
            .get(&TypeId::of::<T>())
            .and_then(|&slot| self.routes.get(slot))
            .map_or(0, |route| route.handler_count())
    }

    /// Events waiting for the next `process` call.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.channels.iter().map(|channel| channel.len()).sum()
    }

    /// Cumulative counters.
    #[must_use]
    pub const fn stats(&self) -> &EventStats {
        &self.stats
    }

    /// Configured cascade limit.
    #[must_use]
    pub const fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Discards every pending event.
    pub fn clear(&mut self) {
        for channel in &mut self.channels {
            channel.clear();
        }
    }

    /// Delivers all pending events, then everything they trigger, pass by pass.
    ///
    /// # Errors
    ///
    /// [`EventError::CascadeDepthExceeded`] if events are still pending after
    /// `max_depth` passes. Those events are discarded; everything delivered
    /// before the limit stays delivered.
    pub fn process(&mut self) -> Result<ProcessStats, EventError> {
        let mut result = ProcessStats::default();

        loop {
            self.sync_routes();
            self.batch.clear();
            self.batch.extend(self.channels.iter().map(|channel| channel.len()));
            let pending: usize = self.batch.iter().sum();
            if pending == 0 {
                break;
            }

            if result.depth == self.max_depth {
                self.clear();
                self.stats.discarded += pending as u64;
                self.stats.cascade_failures += 1;
                self.stats.deepest_cascade = self.stats.deepest_cascade.max(result.depth);
                tracing::error!(
                    "Event cascade exceeded depth {}: {} events discarded",
                    self.max_depth,
                    pending
                );
                return Err(EventError::CascadeDepthExceeded {
                    max_depth: self.max_depth,
                    pending,
                });
            }
            result.depth += 1;

            for slot in 0..self.batch.len() {
                let count = self.batch[slot];
                if count == 0 {
                    continue;
                }
                self.routes[slot].take_batch(self.channels[slot].as_mut(), count);
                let mut sink = EventSink {
                    channels: &mut self.channels,
                    index: &mut self.index,
                    emitted: &mut self.stats.emitted,
                    queue_capacity: self.queue_capacity,
                };
                let (delivered, dropped) = self.routes[slot].dispatch(&mut sink);
                result.delivered += delivered;
                result.dropped += dropped;
            }
        }

        self.stats.delivered += result.delivered as u64;
        self.stats.dropped += result.dropped as u64;
        self.stats.deepest_cascade = self.stats.deepest_cascade.max(result.depth);
        if result.dropped > 0 {
            tracing::trace!("{} events had no subscriber", result.dropped);
        }
        Ok(result)
    }

    fn sync_routes(&mut self) {
        for slot in self.routes.len()..self.channels.len() {
            let route = self.channels[slot].new_route();
            self.routes.push(route);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Ping(u32);
    impl Event for Ping {}

    #[derive(Debug, Clone, PartialEq)]
    struct Pong(u32);
    impl Event for Pong {}

    fn recorder<T: Event + Clone>(bus: &mut EventBus) -> Arc<Mutex<Vec<T>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        bus.subscribe(move |event: &T, _: &mut EventSink<'_>| sink.lock().push(event.clone()));
        log
    }

    #[test]
    fn test_emit_is_deferred() {
        let mut bus = EventBus::new(4, 8);
        let log = recorder::<Ping>(&mut bus);
        bus.emit(Ping(1));
        assert!(log.lock().is_empty());
        assert_eq!(bus.pending(), 1);

        let stats = bus.process().unwrap();
        assert_eq!(stats.delivered, 1);
        assert_eq!(*log.lock(), vec![Ping(1)]);
        assert_eq!(bus.pending(), 0);
    }

    #[test]
    fn test_fifo_within_type_and_handler_order() {
        let mut bus = EventBus::new(4, 8);
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b"] {
            let order = Arc::clone(&order);
            bus.subscribe(move |event: &Ping, _: &mut EventSink<'_>| {
                order.lock().push(format!("{tag}{}", event.0));
            });
        }
        bus.emit_batch([Ping(1), Ping(2), Ping(3)]);
        bus.process().unwrap();
        assert_eq!(*order.lock(), vec!["a1", "b1", "a2", "b2", "a3", "b3"]);
    }

    #[test]
    fn test_types_in_registration_order() {
        let mut bus = EventBus::new(4, 8);
        let order = Arc::new(Mutex::new(Vec::new()));
        {
            let order = Arc::clone(&order);
            bus.subscribe(move |p: &Pong, _: &mut EventSink<'_>| order.lock().push(format!("pong{}", p.0)));
        }
        {
            let order = Arc::clone(&order);
            bus.subscribe(move |p: &Ping, _: &mut EventSink<'_>| order.lock().push(format!("ping{}", p.0)));
        }
        bus.emit(Ping(1));
        bus.emit(Pong(2));
        bus.emit(Ping(3));
        bus.process().unwrap();
        assert_eq!(*order.lock(), vec!["pong2", "ping1", "ping3"]);
    }

    #[test]
    fn test_handler_emissions_delivered_next_pass() {
        let mut bus = EventBus::new(4, 8);
        bus.subscribe(|ping: &Ping, sink: &mut EventSink<'_>| sink.emit(Pong(ping.0 * 10)));
        let pongs = recorder::<Pong>(&mut bus);

        bus.emit(Ping(1));
        bus.emit(Ping(2));
        let stats = bus.process().unwrap();
        assert_eq!(stats.depth, 2);
        assert_eq!(*pongs.lock(), vec![Pong(10), Pong(20)]);
    }

    #[test]
    fn test_unconditional_re_emit_is_halted() {
        let mut bus = EventBus::new(16, 8);
        let calls = Arc::new(Mutex::new(0u32));
        {
            let calls = Arc::clone(&calls);
            bus.subscribe(move |ping: &Ping, sink: &mut EventSink<'_>| {
                *calls.lock() += 1;
                sink.emit(Ping(ping.0 + 1));
            });
        }
        bus.emit(Ping(0));
        let err = bus.process().unwrap_err();
        assert_eq!(
            err,
            EventError::CascadeDepthExceeded {
                max_depth: 16,
                pending: 1
            }
        );
        assert_eq!(*calls.lock(), 16);
        assert_eq!(bus.pending(), 0);
        assert_eq!(bus.stats().cascade_failures, 1);

        // The bus stays usable after an overflow.
        bus.emit(Pong(1));
        assert!(bus.process().is_ok());
    }

    #[test]
    fn test_unsubscribed_events_are_dropped_and_counted() {
        let mut bus = EventBus::new(4, 8);
        bus.register::<Pong>();
        bus.emit(Pong(1));
        bus.emit(Pong(2));
        let stats = bus.process().unwrap();
        assert_eq!(stats.dropped, 2);
        assert_eq!(bus.stats().dropped, 2);
        assert_eq!(bus.stats().emitted, 2);
        assert_eq!(bus.subscriber_count::<Pong>(), 0);
    }

    #[test]
    fn test_handler_may_emit_unregistered_type() {
        #[derive(Debug, Clone, PartialEq)]
        struct Late(u8);
        impl Event for Late {}

        let mut bus = EventBus::new(4, 8);
        bus.subscribe(|_: &Ping, sink: &mut EventSink<'_>| sink.emit(Late(7)));
        bus.emit(Ping(1));
        let stats = bus.process().unwrap();
        assert_eq!(stats.depth, 2);
        assert_eq!(stats.dropped, 1);

        let late = recorder::<Late>(&mut bus);
        bus.emit(Ping(2));
        bus.process().unwrap();
        assert_eq!(*late.lock(), vec![Late(7)]);
    }
}
