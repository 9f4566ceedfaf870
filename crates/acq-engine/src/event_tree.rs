//! Lazy depth-first expansion of nested axis generators.
//!
//! An acquisition is described as an ordered list of [`AxisGenerator`]s, one
//! per axis (e.g. time, position, z, channel). Each generator turns a
//! partially-filled event into the lazy sequence of its children along that
//! axis. [`EventTreeIterator`] composes them into a single stream of leaf
//! events in depth-first, left-to-right order:
//!
//! ```text
//! root ─┬─ t=0 ─┬─ t=0,c=A   (leaf 1)
//!       │       └─ t=0,c=B   (leaf 2)
//!       └─ t=1 ─┬─ t=1,c=A   (leaf 3)
//!               └─ t=1,c=B   (leaf 4)
//! ```
//!
//! Only the current root-to-leaf path is held: the iterator keeps an explicit
//! stack of frames, each owning the sibling iterator for its depth. Popping an
//! exhausted frame drops its iterator immediately, so memory is O(depth) even
//! for infinite time-lapse streams.

use std::iter::FusedIterator;
use std::sync::Arc;

use acq_core::{AcqError, AcqResult, AcquisitionEvent};
use tracing::{debug, trace};

/// Lazy sequence of child events for one axis.
pub type EventStream = Box<dyn Iterator<Item = AcquisitionEvent> + Send>;

/// Expands a partially-filled event along one axis.
pub type AxisGenerator = Arc<dyn Fn(&AcquisitionEvent) -> AcqResult<EventStream> + Send + Sync>;

/// Rewrites each leaf just before it is handed out.
pub type EventMonitor = Box<dyn FnMut(AcquisitionEvent) -> AcquisitionEvent + Send>;

/// Wrap a closure returning any iterable of events as an [`AxisGenerator`].
pub fn axis_generator<F, I>(f: F) -> AxisGenerator
where
    F: Fn(&AcquisitionEvent) -> AcqResult<I> + Send + Sync + 'static,
    I: IntoIterator<Item = AcquisitionEvent>,
    I::IntoIter: Send + 'static,
{
    Arc::new(move |event| {
        let children = f(event)?;
        Ok(Box::new(children.into_iter()) as EventStream)
    })
}

/// Outcome of [`EventTreeIterator::fetch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Fetch {
    /// The next leaf event.
    Leaf(AcquisitionEvent),
    /// The tree is exhausted. Carries the last leaf produced, if any, so an
    /// over-read ends deterministically instead of failing.
    Exhausted(Option<AcquisitionEvent>),
}

struct Frame {
    siblings: EventStream,
    /// Generator applied to events of this frame; `None` marks leaf frames
    next_depth: Option<usize>,
}

/// Depth-first iterator over the leaves of an axis-generator tree.
pub struct EventTreeIterator {
    generators: Vec<AxisGenerator>,
    stack: Vec<Frame>,
    root: Option<AcquisitionEvent>,
    last: Option<AcquisitionEvent>,
    monitor: Option<EventMonitor>,
    exhausted: bool,
    produced: u64,
}

impl EventTreeIterator {
    pub fn new(root: AcquisitionEvent, generators: Vec<AxisGenerator>) -> Self {
        Self {
            generators,
            stack: Vec::new(),
            root: Some(root),
            last: None,
            monitor: None,
            exhausted: false,
            produced: 0,
        }
    }

    /// Apply `monitor` to every leaf before it is returned.
    pub fn with_monitor<M>(mut self, monitor: M) -> Self
    where
        M: FnMut(AcquisitionEvent) -> AcquisitionEvent + Send + 'static,
    {
        self.monitor = Some(Box::new(monitor));
        self
    }

    /// Current depth of the retained path.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Number of leaves produced so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn leaf_depth(&self, depth: usize) -> Option<usize> {
        (depth + 1 < self.generators.len()).then_some(depth + 1)
    }

    fn expand(&self, depth: usize, event: &AcquisitionEvent) -> AcqResult<Frame> {
        let siblings = (self.generators[depth])(event)?;
        Ok(Frame {
            siblings,
            next_depth: self.leaf_depth(depth),
        })
    }

    fn begin(&mut self) -> AcqResult<()> {
        let Some(root) = self.root.take() else {
            return Ok(());
        };
        let frame = if self.generators.is_empty() {
            Frame {
                siblings: Box::new(std::iter::once(root)),
                next_depth: None,
            }
        } else {
            self.expand(0, &root)?
        };
        self.stack.push(frame);
        Ok(())
    }

    fn exhaust(&mut self) {
        self.exhausted = true;
        self.stack.clear();
        self.root = None;
    }

    /// Fetch the next leaf.
    ///
    /// A generator failure is returned once and leaves the iterator
    /// exhausted.
    pub fn fetch(&mut self) -> AcqResult<Fetch> {
        if self.exhausted {
            return Ok(Fetch::Exhausted(self.last.clone()));
        }
        if let Err(err) = self.begin() {
            self.exhaust();
            return Err(err);
        }

        loop {
            let (next, next_depth) = match self.stack.last_mut() {
                Some(frame) => (frame.siblings.next(), frame.next_depth),
                None => {
                    debug!(leaves = self.produced, "event tree exhausted");
                    self.exhaust();
                    return Ok(Fetch::Exhausted(self.last.clone()));
                }
            };

            match (next, next_depth) {
                (Some(event), None) => {
                    let leaf = match self.monitor.as_mut() {
                        Some(monitor) => monitor(event),
                        None => event,
                    };
                    self.produced += 1;
                    self.last = Some(leaf.clone());
                    return Ok(Fetch::Leaf(leaf));
                }
                (Some(event), Some(depth)) => match self.expand(depth, &event) {
                    Ok(frame) => self.stack.push(frame),
                    Err(err) => {
                        self.exhaust();
                        return Err(match err {
                            AcqError::Generation(_) | AcqError::ReservedAxis(_) => err,
                            other => AcqError::Generation(other.to_string()),
                        });
                    }
                },
                (None, _) => {
                    trace!(depth = self.stack.len(), "backtracking");
                    self.stack.pop();
                }
            }
        }
    }
}

impl Iterator for EventTreeIterator {
    type Item = AcqResult<AcquisitionEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.fetch() {
            Ok(Fetch::Leaf(event)) => Some(Ok(event)),
            Ok(Fetch::Exhausted(_)) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

impl FusedIterator for EventTreeIterator {}

impl std::fmt::Debug for EventTreeIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTreeIterator")
            .field("axes", &self.generators.len())
            .field("depth", &self.stack.len())
            .field("produced", &self.produced)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acq_core::AxisName;

    fn time(n: i64) -> AxisGenerator {
        axis_generator(move |event: &AcquisitionEvent| {
            let base = event.clone();
            Ok((0..n).map(move |t| base.clone().with_axis(&AxisName::time(), t)))
        })
    }

    fn channels(names: &'static [&'static str]) -> AxisGenerator {
        axis_generator(move |event: &AcquisitionEvent| {
            let base = event.clone();
            Ok(names
                .iter()
                .map(move |name| base.clone().with_channel(None, *name)))
        })
    }

    fn leaf(t: i64, channel: &str) -> AcquisitionEvent {
        AcquisitionEvent::new()
            .with_axis(&AxisName::time(), t)
            .with_channel(None, channel)
    }

    #[test]
    fn yields_leaves_depth_first_then_repeats_last() {
        let mut iter =
            EventTreeIterator::new(AcquisitionEvent::new(), vec![time(2), channels(&["A", "B"])]);
        let expected = [leaf(0, "A"), leaf(0, "B"), leaf(1, "A"), leaf(1, "B")];
        for want in &expected {
            assert_eq!(iter.fetch().unwrap(), Fetch::Leaf(want.clone()));
        }
        assert_eq!(
            iter.fetch().unwrap(),
            Fetch::Exhausted(Some(leaf(1, "B")))
        );
        assert_eq!(
            iter.fetch().unwrap(),
            Fetch::Exhausted(Some(leaf(1, "B")))
        );
        assert!(iter.is_exhausted());
        assert_eq!(iter.produced(), 4);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let run = || {
            EventTreeIterator::new(
                AcquisitionEvent::new(),
                vec![time(3), channels(&["DAPI", "GFP", "RFP"])],
            )
            .collect::<AcqResult<Vec<_>>>()
            .unwrap()
        };
        let first = run();
        assert_eq!(first.len(), 9);
        assert_eq!(first, run());
    }

    #[test]
    fn empty_branch_backtracks_to_next_sibling() {
        // Time point 1 has no channels at all.
        let sparse = axis_generator(|event: &AcquisitionEvent| {
            let names: Vec<&str> = match event.axis_position("time") {
                Some(1) => vec![],
                _ => vec!["A"],
            };
            let base = event.clone();
            Ok(names
                .into_iter()
                .map(move |name| base.clone().with_channel(None, name)))
        });
        let leaves: Vec<_> = EventTreeIterator::new(AcquisitionEvent::new(), vec![time(3), sparse])
            .map(|e| e.unwrap().axis_position("time"))
            .collect();
        assert_eq!(leaves, vec![Some(0), Some(2)]);
    }

    #[test]
    fn single_axis_is_flat() {
        let leaves: Vec<_> = EventTreeIterator::new(AcquisitionEvent::new(), vec![time(3)])
            .map(|e| e.unwrap())
            .collect();
        assert_eq!(leaves.len(), 3);
        assert_eq!(leaves[2].axis_position("time"), Some(2));
    }

    #[test]
    fn no_axes_yields_the_root_once() {
        let root = AcquisitionEvent::new().with_exposure(5.0);
        let mut iter = EventTreeIterator::new(root.clone(), Vec::new());
        assert_eq!(iter.fetch().unwrap(), Fetch::Leaf(root.clone()));
        assert_eq!(iter.fetch().unwrap(), Fetch::Exhausted(Some(root)));
    }

    #[test]
    fn infinite_axis_keeps_depth_bounded() {
        let forever = axis_generator(|event: &AcquisitionEvent| {
            let base = event.clone();
            Ok((0..).map(move |t| base.clone().with_axis(&AxisName::time(), t)))
        });
        let mut iter =
            EventTreeIterator::new(AcquisitionEvent::new(), vec![forever, channels(&["A"])]);
        for _ in 0..1000 {
            assert!(matches!(iter.fetch().unwrap(), Fetch::Leaf(_)));
            assert!(iter.depth() <= 2);
        }
    }

    #[test]
    fn monitor_rewrites_leaves_without_changing_order() {
        let mut counter = 0;
        let leaves: Vec<_> =
            EventTreeIterator::new(AcquisitionEvent::new(), vec![time(2), channels(&["A", "B"])])
                .with_monitor(move |event| {
                    counter += 1;
                    event.with_exposure(f64::from(counter))
                })
                .map(|e| e.unwrap())
                .collect();
        let exposures: Vec<_> = leaves.iter().filter_map(|e| e.exposure_ms()).collect();
        assert_eq!(exposures, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(leaves[1].channel_name(), Some("B"));
    }

    #[test]
    fn generator_error_ends_the_stream() {
        let failing = axis_generator(|event: &AcquisitionEvent| {
            if event.axis_position("time") == Some(1) {
                return Err(AcqError::Generation("focus map missing".into()));
            }
            Ok(vec![event.clone().with_channel(None, "A")])
        });
        let mut iter = EventTreeIterator::new(AcquisitionEvent::new(), vec![time(3), failing]);
        assert!(matches!(iter.next(), Some(Ok(_))));
        assert_eq!(
            iter.next(),
            Some(Err(AcqError::Generation("focus map missing".into())))
        );
        assert_eq!(iter.next(), None);
    }
}
