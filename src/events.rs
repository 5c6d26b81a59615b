//! The synchronous, in-order event bus. Observers run on the engine
//! thread during the emitting tick; a blocking observer stalls the
//! engine (documented, not prevented).

use crate::cell::CellId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathCause {
    Lazy,
    Reaper,
    Disturbance,
    Allocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Cosmic,
    Copy,
    Flaw,
    DivideMutation,
    GeneticInstructionInsertion,
    GeneticInstructionDeletion,
    GeneticInstructionCrossover,
    GeneticSegmentDeletion,
    GeneticSegmentInsertion,
    GeneticSegmentCrossover,
}

#[derive(Debug, Clone)]
pub enum Event {
    CellBorn {
        cell_id: CellId,
        parent_id: Option<CellId>,
        genotype_name: String,
    },
    CellDied {
        cell_id: CellId,
        cause: DeathCause,
    },
    NewGenotype {
        genotype_name: String,
    },
    GenotypeExtinct {
        genotype_name: String,
    },
    Mutation {
        kind: MutationKind,
        cell_id: Option<CellId>,
    },
    Milestone {
        instruction_count: u64,
    },
}

pub trait EventObserver {
    fn on_event(&mut self, event: &Event);
}

/// An observer that forwards every event as a `tracing` debug record;
/// always installed so engine activity is visible without a dedicated
/// observer.
pub struct TracingObserver;

impl EventObserver for TracingObserver {
    fn on_event(&mut self, event: &Event) {
        tracing::debug!(?event, "engine event");
    }
}

#[derive(Default)]
pub struct EventBus {
    observers: Vec<Box<dyn EventObserver>>,
    log: Vec<Event>,
}

impl EventBus {
    pub fn new() -> EventBus {
        EventBus {
            observers: vec![Box::new(TracingObserver)],
            log: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, observer: Box<dyn EventObserver>) {
        self.observers.push(observer);
    }

    pub fn emit(&mut self, event: Event) {
        for observer in &mut self.observers {
            observer.on_event(&event);
        }
        self.log.push(event);
    }

    /// The full ordered event history for this simulation, used by
    /// determinism tests to compare two runs.
    pub fn history(&self) -> &[Event] {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        count: usize,
    }

    impl EventObserver for Recorder {
        fn on_event(&mut self, _event: &Event) {
            self.count += 1;
        }
    }

    #[test]
    fn emit_reaches_subscribed_observers() {
        let mut bus = EventBus::new();
        bus.subscribe(Box::new(Recorder { count: 0 }));
        bus.emit(Event::Milestone {
            instruction_count: 100,
        });
        assert_eq!(bus.history().len(), 1);
    }

    #[test]
    fn history_preserves_order() {
        let mut bus = EventBus::new();
        bus.emit(Event::Milestone { instruction_count: 1 });
        bus.emit(Event::Milestone { instruction_count: 2 });
        let history = bus.history();
        match (&history[0], &history[1]) {
            (Event::Milestone { instruction_count: a }, Event::Milestone { instruction_count: b }) => {
                assert!(a < b);
            }
            _ => panic!("unexpected event order"),
        }
    }
}
