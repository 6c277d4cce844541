//! Traces progress of a shuffle round
//!
//! Provides [`Tracer`], a trait the round calls into as it moves through
//! phases, sends and receives messages, and (if it comes to that) enters
//! blame. Out of the box there's [`PerfProfiler`], useful for benchmarking
//! how long a round spends in each phase.

use std::fmt;
use std::time::{Duration, Instant};

/// Traces progress of a round's execution
///
/// See [module level documentation](self) for more details
pub trait Tracer: Send + Sync {
    /// Traces an occurred event
    fn trace_event(&mut self, event: Event);

    /// Traces [`Event::RoundBegins`]
    fn phase_begins(&mut self, phase: &'static str) {
        self.trace_event(Event::RoundBegins { name: phase })
    }
    /// Traces [`Event::SendMsg`]
    fn send_msg(&mut self, kind: &'static str) {
        self.trace_event(Event::SendMsg { kind })
    }
    /// Traces [`Event::MsgSent`]
    fn msg_sent(&mut self) {
        self.trace_event(Event::MsgSent)
    }
    /// Traces [`Event::MsgReceived`]
    fn msg_received(&mut self, kind: &'static str, from: u16) {
        self.trace_event(Event::MsgReceived { kind, from })
    }
    /// Traces [`Event::BlameEntered`]
    fn blame_entered(&mut self, reason: &'static str) {
        self.trace_event(Event::BlameEntered { reason })
    }
    /// Traces [`Event::RoundEnds`]
    fn round_ends(&mut self) {
        self.trace_event(Event::RoundEnds)
    }
}

/// Event occurred during a round's execution
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Event {
    /// A new phase of the state machine begins
    RoundBegins {
        /// Name of the phase
        name: &'static str,
    },
    /// The round starts sending a message
    SendMsg {
        /// Message kind
        kind: &'static str,
    },
    /// The round finished sending a message
    MsgSent,
    /// The round accepted an inbound message into the transcript
    MsgReceived {
        /// Message kind
        kind: &'static str,
        /// Sender index
        from: u16,
    },
    /// The round transitioned into the blame sub-protocol
    BlameEntered {
        /// Why blame was entered
        reason: &'static str,
    },
    /// The round reached a terminal state
    RoundEnds,
}

impl Tracer for &mut dyn Tracer {
    fn trace_event(&mut self, event: Event) {
        (*self).trace_event(event)
    }
}

impl<T: Tracer> Tracer for Option<T> {
    fn trace_event(&mut self, event: Event) {
        if let Some(tracer) = self {
            tracer.trace_event(event)
        }
    }
}

/// Profiles how long a round spends in each phase
///
/// Implements [`Tracer`], so it can be handed to [`crate::round::Round`]
/// directly. Call [`PerfProfiler::get_report`] once the round reaches a
/// terminal state.
pub struct PerfProfiler {
    last_timestamp: Option<Instant>,
    report: PerfReport,
}

/// Performance report produced by [`PerfProfiler`]
#[derive(Debug, Clone, Default)]
pub struct PerfReport {
    /// Time spent in each named phase, in the order phases were entered
    pub phases: Vec<(&'static str, Duration)>,
    /// Number of messages sent
    pub messages_sent: usize,
    /// Number of messages accepted into the transcript
    pub messages_received: usize,
}

impl Tracer for PerfProfiler {
    fn trace_event(&mut self, event: Event) {
        let now = Instant::now();
        match event {
            Event::RoundBegins { name } => {
                if let Some(last) = self.last_timestamp {
                    if let Some((_, dur)) = self.report.phases.last_mut() {
                        *dur += now - last;
                    }
                }
                self.report.phases.push((name, Duration::ZERO));
            }
            Event::MsgSent => self.report.messages_sent += 1,
            Event::MsgReceived { .. } => self.report.messages_received += 1,
            Event::SendMsg { .. } | Event::BlameEntered { .. } | Event::RoundEnds => {}
        }
        self.last_timestamp = Some(now);
    }
}

impl PerfProfiler {
    /// Constructs a fresh profiler
    pub fn new() -> Self {
        Self {
            last_timestamp: None,
            report: PerfReport::default(),
        }
    }

    /// Obtains the report collected so far
    pub fn get_report(&self) -> PerfReport {
        self.report.clone()
    }
}

impl Default for PerfProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PerfReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Round performance:")?;
        writeln!(
            f,
            "  - messages sent: {}, received: {}",
            self.messages_sent, self.messages_received
        )?;
        for (name, dur) in &self.phases {
            writeln!(f, "  - {name}: {dur:.2?}")?;
        }
        Ok(())
    }
}
