use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt::{Debug, Formatter};
use std::time::Duration;

pub type EventHandler<C> = Box<dyn FnOnce(&mut C)>;

/// A discrete-event scheduler over a virtual clock
///
/// Events run in timestamp order. Events sharing a timestamp run in the order they were
/// scheduled.
pub struct Scheduler<C> {
    now: Duration,
    next_event_id: u64,
    pending: BinaryHeap<PendingEvent<C>>,
    stop_at: Option<Duration>,
    executed_events: u64,
}

impl<C> Debug for Scheduler<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.now)
            .field("pending", &self.pending.len())
            .field("stop_at", &self.stop_at)
            .finish()
    }
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Scheduler<C> {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_event_id: 0,
            pending: BinaryHeap::new(),
            stop_at: None,
            executed_events: 0,
        }
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn executed_events(&self) -> u64 {
        self.executed_events
    }

    pub fn pending_events(&self) -> usize {
        self.pending.len()
    }

    pub fn schedule(&mut self, delay: Duration, handler: impl FnOnce(&mut C) + 'static) {
        self.schedule_at(self.now + delay, handler)
    }

    pub fn schedule_at(&mut self, at: Duration, handler: impl FnOnce(&mut C) + 'static) {
        let id = self.next_event_id;
        self.next_event_id += 1;

        self.pending.push(PendingEvent {
            id,
            // Time never goes backwards
            at: at.max(self.now),
            handler: Box::new(handler),
        });
    }

    /// Events scheduled after `at` will never run
    pub fn stop_at(&mut self, at: Duration) {
        self.stop_at = Some(at);
    }

    pub(crate) fn pop_next(&mut self) -> Option<EventHandler<C>> {
        let event = self.pending.pop()?;

        match self.stop_at {
            Some(stop_at) if event.at > stop_at => {
                self.now = stop_at;
                self.pending.clear();
                return None;
            }
            _ => {}
        }

        self.now = event.at;
        self.executed_events += 1;
        Some(event.handler)
    }
}

/// Runs events until there are none left or the stop time is reached
pub fn run<C>(context: &mut C, scheduler: impl Fn(&mut C) -> &mut Scheduler<C>) {
    while let Some(handler) = scheduler(context).pop_next() {
        handler(context);
    }
}

struct PendingEvent<C> {
    id: u64,
    at: Duration,
    handler: EventHandler<C>,
}

impl<C> PartialEq for PendingEvent<C> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<C> Eq for PendingEvent<C> {}

impl<C> PartialOrd for PendingEvent<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C> Ord for PendingEvent<C> {
    // Reversed, so the max-heap yields the earliest event first
    fn cmp(&self, other: &Self) -> Ordering {
        other.at.cmp(&self.at).then(other.id.cmp(&self.id))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct Trace {
        scheduler: Scheduler<Trace>,
        log: Vec<(Duration, &'static str)>,
    }

    impl Trace {
        fn record(&mut self, name: &'static str) {
            let now = self.scheduler.now();
            self.log.push((now, name));
        }

        fn run(&mut self) {
            run(self, |t| &mut t.scheduler);
        }
    }

    #[test]
    fn test_pending_event_ord_descending() {
        let early = PendingEvent::<Trace> {
            id: 1,
            at: Duration::from_secs(1),
            handler: Box::new(|_| {}),
        };
        let late = PendingEvent::<Trace> {
            id: 0,
            at: Duration::from_secs(5),
            handler: Box::new(|_| {}),
        };

        assert!(early > late);
    }

    #[test]
    fn test_events_run_in_time_order() {
        let mut trace = Trace::default();
        trace
            .scheduler
            .schedule(Duration::from_secs(3), |t| t.record("third"));
        trace
            .scheduler
            .schedule(Duration::from_secs(1), |t| t.record("first"));
        trace
            .scheduler
            .schedule(Duration::from_secs(2), |t| t.record("second"));

        trace.run();

        let names: Vec<_> = trace.log.iter().map(|(_, name)| *name).collect();
        assert_eq!(names, ["first", "second", "third"]);
        assert_eq!(trace.scheduler.now(), Duration::from_secs(3));
    }

    #[test]
    fn test_ties_run_in_schedule_order() {
        let mut trace = Trace::default();
        for name in ["a", "b", "c", "d"] {
            trace
                .scheduler
                .schedule(Duration::from_millis(10), move |t| t.record(name));
        }

        trace.run();

        let names: Vec<_> = trace.log.iter().map(|(_, name)| *name).collect();
        assert_eq!(names, ["a", "b", "c", "d"]);
    }

    #[test]
    fn test_events_can_schedule_events() {
        let mut trace = Trace::default();
        trace.scheduler.schedule(Duration::from_secs(1), |t| {
            t.record("outer");
            t.scheduler
                .schedule(Duration::from_secs(1), |t| t.record("inner"));
        });

        trace.run();

        assert_eq!(
            trace.log,
            [
                (Duration::from_secs(1), "outer"),
                (Duration::from_secs(2), "inner")
            ]
        );
    }

    #[test]
    fn test_stop_discards_later_events() {
        let mut trace = Trace::default();
        trace
            .scheduler
            .schedule(Duration::from_secs(5), |t| t.record("at stop"));
        trace
            .scheduler
            .schedule(Duration::from_secs(6), |t| t.record("after stop"));
        trace.scheduler.stop_at(Duration::from_secs(5));

        trace.run();

        assert_eq!(trace.log, [(Duration::from_secs(5), "at stop")]);
        assert_eq!(trace.scheduler.pending_events(), 0);
    }

    #[test]
    fn test_stop_advances_clock_to_stop_time() {
        let mut trace = Trace::default();
        trace
            .scheduler
            .schedule(Duration::from_secs(60), |t| t.record("never"));
        trace.scheduler.stop_at(Duration::from_secs(10));

        trace.run();

        assert!(trace.log.is_empty());
        assert_eq!(trace.scheduler.now(), Duration::from_secs(10));
    }

    #[test]
    fn test_executed_events_are_counted() {
        let mut trace = Trace::default();
        for secs in 1..=3 {
            trace
                .scheduler
                .schedule(Duration::from_secs(secs), |t| t.record("tick"));
        }
        trace.scheduler.stop_at(Duration::from_secs(2));

        trace.run();

        assert_eq!(trace.scheduler.executed_events(), 2);
        assert_eq!(trace.scheduler.pending_events(), 0);
    }
}
