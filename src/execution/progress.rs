//! Pipeline events, observers and per-computation progress.

use crate::core::error::{ComputationError, ComputationResult, NodeId};
use crossbeam::channel::{self, Receiver};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Something that happened while a node was being updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// The node started generating data.
    Start { node_id: NodeId },
    /// Fraction of the node's work done so far, in `[0, 1]`.
    Progress { node_id: NodeId, fraction: f64 },
    /// The node finished generating data.
    End { node_id: NodeId },
    /// The node stopped because its abort flag was raised.
    Abort { node_id: NodeId },
    /// The node's computation failed.
    Error { node_id: NodeId, message: String },
}

impl PipelineEvent {
    pub fn node_id(&self) -> NodeId {
        match self {
            PipelineEvent::Start { node_id }
            | PipelineEvent::Progress { node_id, .. }
            | PipelineEvent::End { node_id }
            | PipelineEvent::Abort { node_id }
            | PipelineEvent::Error { node_id, .. } => *node_id,
        }
    }
}

/// Callback type for pipeline events.
pub type Observer = Arc<dyn Fn(&PipelineEvent) + Send + Sync>;

/// Observer that forwards every event to a channel.
pub fn channel_observer() -> (Observer, Receiver<PipelineEvent>) {
    let (sender, receiver) = channel::unbounded();
    let observer: Observer = Arc::new(move |event: &PipelineEvent| {
        // A dropped receiver just means nobody is listening any more.
        let _ = sender.send(event.clone());
    });
    (observer, receiver)
}

/// The set of observers events are delivered to.
#[derive(Clone, Default)]
pub struct EventHub {
    observers: Arc<Vec<Observer>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer.
    pub fn add(&mut self, observer: Observer) {
        Arc::make_mut(&mut self.observers).push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Deliver `event` to every observer, in registration order.
    pub fn emit(&self, event: &PipelineEvent) {
        for observer in self.observers.iter() {
            observer(event);
        }
    }
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Shared flag asking a running computation to stop.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Counts finished elements for one `generate_data` call.
///
/// Every worker adds to the count, but only thread 0 emits progress
/// events, and at most once per hundredth of the total.
#[derive(Debug)]
pub struct ProgressReporter {
    node_id: NodeId,
    total: AtomicU64,
    done: AtomicU64,
    next_report: AtomicU64,
    events: EventHub,
    abort: AbortHandle,
}

/// Number of progress events a full run emits at most.
const PROGRESS_STEPS: u64 = 100;

impl ProgressReporter {
    pub fn new(node_id: NodeId, events: EventHub, abort: AbortHandle) -> Self {
        Self {
            node_id,
            total: AtomicU64::new(0),
            done: AtomicU64::new(0),
            next_report: AtomicU64::new(1),
            events,
            abort,
        }
    }

    /// Reporter with no observers and its own abort flag.
    pub fn detached(node_id: NodeId) -> Self {
        Self::new(node_id, EventHub::new(), AbortHandle::new())
    }

    /// Start counting towards `total` elements.
    pub fn reset(&self, total: u64) {
        self.total.store(total, Ordering::Release);
        self.done.store(0, Ordering::Release);
        self.next_report.store(1, Ordering::Release);
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Fraction of the total done so far.
    pub fn fraction(&self) -> f64 {
        let total = self.total.load(Ordering::Acquire);
        if total == 0 {
            return 0.0;
        }
        (self.done.load(Ordering::Acquire) as f64 / total as f64).min(1.0)
    }

    /// Record `count` finished elements on `thread_id`, then check the
    /// abort flag.
    pub fn completed_pixels(&self, thread_id: usize, count: u64) -> ComputationResult<()> {
        let done = self.done.fetch_add(count, Ordering::AcqRel) + count;
        if thread_id == 0 {
            let total = self.total.load(Ordering::Acquire);
            if total > 0 {
                let step = done.saturating_mul(PROGRESS_STEPS) / total;
                let next = self.next_report.load(Ordering::Acquire);
                if step >= next {
                    self.next_report.store(step + 1, Ordering::Release);
                    self.events.emit(&PipelineEvent::Progress {
                        node_id: self.node_id,
                        fraction: self.fraction(),
                    });
                }
            }
        }
        self.check_abort()
    }

    /// `Err(Aborted)` once the abort flag is raised.
    pub fn check_abort(&self) -> ComputationResult<()> {
        if self.abort.is_aborted() {
            return Err(ComputationError::Aborted);
        }
        Ok(())
    }

    /// Emit a progress event for an arbitrary fraction, e.g. from a filter
    /// that does not work per element.
    pub fn update_progress(&self, fraction: f64) {
        self.events.emit(&PipelineEvent::Progress {
            node_id: self.node_id,
            fraction: fraction.clamp(0.0, 1.0),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_observer_receives_events() {
        let (observer, receiver) = channel_observer();
        let mut hub = EventHub::new();
        hub.add(observer);

        let node_id = NodeId::new();
        hub.emit(&PipelineEvent::Start { node_id });
        hub.emit(&PipelineEvent::End { node_id });

        let events: Vec<_> = receiver.try_iter().collect();
        assert_eq!(
            events,
            vec![PipelineEvent::Start { node_id }, PipelineEvent::End { node_id }]
        );
        assert_eq!(events[1].node_id(), node_id);
    }

    #[test]
    fn test_only_thread_zero_reports() {
        let (observer, receiver) = channel_observer();
        let mut hub = EventHub::new();
        hub.add(observer);

        let reporter = ProgressReporter::new(NodeId::new(), hub, AbortHandle::new());
        reporter.reset(1_000);
        reporter.completed_pixels(1, 500).unwrap();
        assert_eq!(receiver.try_iter().count(), 0);

        reporter.completed_pixels(0, 10).unwrap();
        let fractions: Vec<f64> = receiver
            .try_iter()
            .filter_map(|e| match e {
                PipelineEvent::Progress { fraction, .. } => Some(fraction),
                _ => None,
            })
            .collect();
        assert_eq!(fractions, vec![0.51]);
    }

    #[test]
    fn test_progress_is_throttled() {
        let (observer, receiver) = channel_observer();
        let mut hub = EventHub::new();
        hub.add(observer);

        let reporter = ProgressReporter::new(NodeId::new(), hub, AbortHandle::new());
        reporter.reset(10_000);
        for _ in 0..10_000 {
            reporter.completed_pixels(0, 1).unwrap();
        }
        assert_eq!(receiver.try_iter().count(), 100);
        assert_eq!(reporter.fraction(), 1.0);
    }

    #[test]
    fn test_abort_flag() {
        let abort = AbortHandle::new();
        let reporter = ProgressReporter::new(NodeId::new(), EventHub::new(), abort.clone());
        reporter.reset(10);
        assert!(reporter.completed_pixels(3, 1).is_ok());

        abort.abort();
        assert!(matches!(
            reporter.completed_pixels(3, 1),
            Err(ComputationError::Aborted)
        ));

        abort.reset();
        assert!(reporter.check_abort().is_ok());
    }

    #[test]
    fn test_event_serialization() {
        let event = PipelineEvent::Progress {
            node_id: NodeId::new(),
            fraction: 0.5,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"progress\""));
    }
}
