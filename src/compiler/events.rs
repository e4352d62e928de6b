//! Structured event logging for transforms.
//!
//! Every transform reports what it changed into an [`EventLog`]. Events can be inspected
//! for debugging and testing or simply ignored; they never influence transform results.
//!
//! # Architecture
//!
//! - [`Event`] - a single recorded event
//! - [`EventLog`] - an append-only, thread-safe collection of events with query helpers
//! - [`EventBuilder`] - fluent API that commits an event when dropped
//!
//! # Example
//!
//! ```rust
//! use flowscope::compiler::{EventKind, EventLog};
//!
//! let log = EventLog::new();
//! log.record(EventKind::ConstantFolded)
//!     .method("Program::Main")
//!     .message("x + 0 -> x");
//! log.info("constant propagation finished");
//!
//! assert_eq!(log.count_kind(EventKind::ConstantFolded), 1);
//! assert_eq!(log.len(), 2);
//! ```

use std::fmt;

use strum::{EnumCount, EnumIter};

use crate::ir::{BasicBlockTag, ValueTag};

/// Categories of events that can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount)]
pub enum EventKind {
    /// A value was replaced by a constant.
    ConstantFolded,
    /// A switch was reduced to fewer branches or a jump.
    BranchSimplified,
    /// A block was found unreachable and its flow replaced.
    BlockMarkedUnreachable,
    /// An instruction was removed.
    InstructionRemoved,
    /// A block parameter was removed.
    ParameterRemoved,
    /// A basic block was removed.
    BlockRemoved,
    /// Two blocks were fused into one.
    BlocksFused,
    /// A block parameter was found redundant and replaced.
    PhiEliminated,
    /// A copy was propagated into its uses.
    CopyPropagated,
    /// A branch was redirected past an intermediate block.
    JumpThreaded,
    /// A try flow was replaced by a jump.
    TryLowered,
    /// An aggregate was split into per-field slots.
    AggregateScalarized,
    /// An aggregate was rebuilt from its fields at a materialization point.
    AggregateRematerialized,
    /// A switch was lowered to tests, bit tests, a jump table or a search tree.
    SwitchLowered,
    /// A switch scrutinee was rewritten algebraically.
    SwitchSimplified,
    /// A call site was inlined.
    MethodInlined,
    /// A call site was considered for inlining and rejected.
    InlineDeclined,
    /// An instruction was replaced by an equivalent dominating value.
    ValueNumbered,
    /// A load was replaced by a known value.
    LoadEliminated,
    /// A store was removed.
    StoreEliminated,
    /// An operator chain was reassociated.
    ExpressionReassociated,
    /// A block's instructions were reordered.
    InstructionsReordered,
    /// A box was replaced by a stack allocation.
    BoxReplaced,

    /// Informational message.
    Info,
    /// Warning (something unexpected but recoverable).
    Warning,
    /// Error (something failed).
    Error,
}

impl EventKind {
    /// Returns a human-readable description of this event kind.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::ConstantFolded => "constant folded",
            Self::BranchSimplified => "branch simplified",
            Self::BlockMarkedUnreachable => "block marked unreachable",
            Self::InstructionRemoved => "instruction removed",
            Self::ParameterRemoved => "parameter removed",
            Self::BlockRemoved => "block removed",
            Self::BlocksFused => "blocks fused",
            Self::PhiEliminated => "phi eliminated",
            Self::CopyPropagated => "copy propagated",
            Self::JumpThreaded => "jump threaded",
            Self::TryLowered => "try lowered",
            Self::AggregateScalarized => "aggregate scalarized",
            Self::AggregateRematerialized => "aggregate rematerialized",
            Self::SwitchLowered => "switch lowered",
            Self::SwitchSimplified => "switch simplified",
            Self::MethodInlined => "method inlined",
            Self::InlineDeclined => "inline declined",
            Self::ValueNumbered => "value numbered",
            Self::LoadEliminated => "load eliminated",
            Self::StoreEliminated => "store eliminated",
            Self::ExpressionReassociated => "expression reassociated",
            Self::InstructionsReordered => "instructions reordered",
            Self::BoxReplaced => "box replaced",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Returns true if this event represents a code transformation.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        !self.is_diagnostic() && *self != Self::InlineDeclined
    }

    /// Returns true if this is a diagnostic event (info/warning/error).
    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Self::Info | Self::Warning | Self::Error)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct Event {
    /// The type of event.
    pub kind: EventKind,
    /// The method the event belongs to (if known).
    pub method: Option<String>,
    /// The block the event concerns (if any).
    pub block: Option<BasicBlockTag>,
    /// The value the event concerns (if any).
    pub value: Option<ValueTag>,
    /// Human-readable description.
    pub message: String,
    /// Name of the transform that produced the event.
    pub pass: Option<String>,
}

impl Event {
    fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            method: None,
            block: None,
            value: None,
            message: message.into(),
            pass: None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Builder for creating events with a fluent API.
///
/// Created by [`EventLog::record`]. The event is automatically added to the log when the
/// builder is dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    method: Option<String>,
    block: Option<BasicBlockTag>,
    value: Option<ValueTag>,
    message: Option<String>,
    pass: Option<String>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            method: None,
            block: None,
            value: None,
            message: None,
            pass: None,
        }
    }

    /// Sets the method the event belongs to.
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Sets the block the event concerns.
    pub fn block(mut self, block: &BasicBlockTag) -> Self {
        self.block = Some(block.clone());
        self
    }

    /// Sets the value the event concerns.
    pub fn value(mut self, value: &ValueTag) -> Self {
        self.value = Some(value.clone());
        self
    }

    /// Sets a custom message describing the event.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Associates this event with a specific transform.
    pub fn pass(mut self, pass_name: impl Into<String>) -> Self {
        self.pass = Some(pass_name.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        let event = Event {
            kind: self.kind,
            method: self.method.take(),
            block: self.block.take(),
            value: self.value.take(),
            message,
            pass: self.pass.take(),
        };

        self.log.events.push(event);
    }
}

/// Collection of events produced by transforms.
///
/// This type is thread-safe: events can be appended concurrently from multiple threads
/// through shared references.
#[derive(Debug)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    /// Creates an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }

    /// Returns true if no events have been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns the total number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts building a new event of the given kind.
    ///
    /// The event is added when the builder is dropped.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Records an informational message.
    pub fn info(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Info, message));
    }

    /// Records a warning message.
    pub fn warn(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Warning, message));
    }

    /// Records an error message.
    pub fn error(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Error, message));
    }

    /// Appends copies of every event of `other`, attributing unattributed events to
    /// `method`.
    pub fn merge_for_method(&self, other: &EventLog, method: &str) {
        for (_, event) in &other.events {
            let mut event = event.clone();
            if event.method.is_none() {
                event.method = Some(method.to_string());
            }
            self.events.push(event);
        }
    }

    /// Returns true if any event of the given kind exists.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.events.iter().any(|(_, e)| e.kind == kind)
    }

    /// Counts events of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|(_, e)| e.kind == kind).count()
    }

    /// Returns an iterator over all events.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Returns an iterator over events of a specific kind.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.kind == kind)
    }

    /// Returns an iterator over transformation events only.
    pub fn transformations(&self) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(|e| e.kind.is_transformation())
    }

    /// Returns an iterator over diagnostic events only.
    pub fn diagnostics(&self) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(|e| e.kind.is_diagnostic())
    }

    /// Returns an iterator over warning events.
    pub fn warnings(&self) -> impl Iterator<Item = &Event> + '_ {
        self.filter_kind(EventKind::Warning)
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_record_event() {
        let log = EventLog::new();
        let block = BasicBlockTag::new("loop");

        log.record(EventKind::BlocksFused)
            .method("Demo::Run")
            .block(&block)
            .pass("block-fusion")
            .message("fused loop into entry");

        assert_eq!(log.len(), 1);
        let event = log.iter().next().unwrap();
        assert_eq!(event.method.as_deref(), Some("Demo::Run"));
        assert_eq!(event.block.as_ref(), Some(&block));
        assert_eq!(event.pass.as_deref(), Some("block-fusion"));
        assert_eq!(event.message, "fused loop into entry");
    }

    #[test]
    fn test_default_message_is_description() {
        let log = EventLog::new();
        log.record(EventKind::PhiEliminated);
        assert_eq!(log.iter().next().unwrap().message, "phi eliminated");
    }

    #[test]
    fn test_transformations_and_diagnostics() {
        let log = EventLog::new();
        log.record(EventKind::ConstantFolded);
        log.record(EventKind::InlineDeclined);
        log.info("some info");
        log.warn("some warning");

        assert_eq!(log.transformations().count(), 1);
        assert_eq!(log.diagnostics().count(), 2);
        assert_eq!(log.warnings().count(), 1);
    }

    #[test]
    fn test_merge_attributes_method() {
        let pass_log = EventLog::new();
        pass_log.record(EventKind::BlockRemoved);
        pass_log.record(EventKind::LoadEliminated).method("Other::Run");

        let log = EventLog::new();
        log.merge_for_method(&pass_log, "Demo::Run");
        let methods: Vec<Option<&str>> = log.iter().map(|e| e.method.as_deref()).collect();
        assert_eq!(methods, [Some("Demo::Run"), Some("Other::Run")]);
        assert_eq!(log.count_kind(EventKind::BlockRemoved), 1);
    }

    #[test]
    fn test_every_kind_is_classified_once() {
        assert_eq!(EventKind::iter().count(), EventKind::COUNT);
        for kind in EventKind::iter() {
            assert!(!(kind.is_transformation() && kind.is_diagnostic()));
            assert!(!kind.description().is_empty());
        }
    }
}
