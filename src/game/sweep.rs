//! Segment sweep index for trail intersection queries
//!
//! Holds a growing set of segments and answers whether a target segment
//! crosses any of them. Events are sorted by x (then y) and swept left to
//! right with a linear active set, so a query is O(k²) in the number of
//! events. Sessions hold tens of players, not thousands, so a balanced-tree
//! sweep is not needed.
//!
//! An index is a per-session, per-tick value. It has no interior locking;
//! parallel sessions each build their own.

use std::cmp::Ordering;

use crate::util::geometry::{Point, Segment};

/// Initial capacity for held segments (one trail's worth)
const HELD_INITIAL_CAPACITY: usize = 32;

/// Sweep event kind. Starts sort before ends at equal coordinates so that
/// segments touching at an endpoint are both active at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EventKind {
    Start,
    End,
}

#[derive(Debug, Clone, Copy)]
struct Event {
    point: Point,
    kind: EventKind,
    /// Index into the held set; `usize::MAX` marks the query target
    segment: usize,
}

const TARGET: usize = usize::MAX;

impl Event {
    fn order(&self, other: &Event) -> Ordering {
        self.point
            .sweep_cmp(&other.point)
            .then_with(|| self.kind.cmp(&other.kind))
    }
}

/// Append-only set of segments queried with a sweep line
#[derive(Debug, Default)]
pub struct SweepIndex {
    held: Vec<Segment>,
}

impl SweepIndex {
    pub fn new() -> Self {
        Self {
            held: Vec::with_capacity(HELD_INITIAL_CAPACITY),
        }
    }

    /// Drop every held segment, keeping the allocation
    #[inline]
    pub fn reset(&mut self) {
        self.held.clear();
    }

    #[inline]
    pub fn insert(&mut self, segment: Segment) {
        self.held.push(segment);
    }

    pub fn extend<I: IntoIterator<Item = Segment>>(&mut self, segments: I) {
        self.held.extend(segments);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.held.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Find a held segment that intersects `target`.
    ///
    /// Returns any witness, not necessarily the first in sweep order.
    /// Intersections between two held segments are ignored.
    pub fn query_intersection(&self, target: &Segment) -> Option<Segment> {
        if self.held.is_empty() {
            return None;
        }

        let mut events = Vec::with_capacity((self.held.len() + 1) * 2);
        for (index, segment) in self.held.iter().enumerate() {
            push_events(&mut events, segment, index);
        }
        push_events(&mut events, target, TARGET);
        events.sort_by(Event::order);

        let mut active: Vec<usize> = Vec::with_capacity(events.len() / 2);
        for event in &events {
            match event.kind {
                EventKind::Start => {
                    let incoming = self.resolve(event.segment, target);
                    for &other in &active {
                        if event.segment != TARGET && other != TARGET {
                            continue;
                        }
                        if incoming.intersects(&self.resolve(other, target)) {
                            let witness = if other == TARGET { event.segment } else { other };
                            return Some(self.held[witness]);
                        }
                    }
                    active.push(event.segment);
                }
                EventKind::End => {
                    if let Some(pos) = active.iter().position(|&s| s == event.segment) {
                        active.swap_remove(pos);
                    }
                }
            }
        }

        None
    }

    #[inline]
    fn resolve(&self, index: usize, target: &Segment) -> Segment {
        if index == TARGET {
            *target
        } else {
            self.held[index]
        }
    }
}

fn push_events(events: &mut Vec<Event>, segment: &Segment, index: usize) {
    let (first, last) = segment.sweep_endpoints();
    events.push(Event {
        point: first,
        kind: EventKind::Start,
        segment: index,
    });
    events.push(Event {
        point: last,
        kind: EventKind::End,
        segment: index,
    });
}
