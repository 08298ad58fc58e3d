//! Short-term and episodic memory.
//!
//! Two independent paths write long-term memory:
//!
//! - [`ShortTermBuffer`] keeps the last C turns. Evicted turns collect on a
//!   [`CompactionStack`]; each full batch of C is reduced by the
//!   [`Summarizer`] into one `interaction_summary` fragment.
//! - [`EpisodicMemoryGate`] counts interactions and commits a `conversation`
//!   fragment each time the threshold is crossed.
//!
//! Both write to the same embedding store under different tags and neither
//! consults the other.

mod buffer;
mod gate;
mod summarizer;

pub use buffer::{AppendOutcome, CompactionStack, ShortTermBuffer};
pub use gate::{narrative, EpisodicMemoryGate, GateOutcome};
pub use summarizer::{batch_id, CommitOutcome, SummarizeError, Summarizer, SummaryStyle};
