//! Controller -> GUI event stream.

use crate::types::Stats;

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// `(component name, new state)`.
    StateChanged(String, String),
    /// A human-readable error message. Emitted alongside the controller's own
    /// transition to `error`; the event itself carries no retry mechanism.
    Error(String),
    /// Periodic throughput statistics.
    Stats(Stats),
}
