use thiserror::Error;

use crate::types::{EdgeKind, ForkId, PhilosopherId};

/// グラフエンジンのエラー
/// どれも致命的で、リトライはしない (Denied はエラーではない)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("cannot set a table for zero philosophers")]
    EmptyTable,

    #[error("unknown philosopher {0}")]
    UnknownPhilosopher(PhilosopherId),

    #[error("unknown fork {0}")]
    UnknownFork(ForkId),

    #[error("no {kind} edge between {philosopher} and {fork}")]
    EdgeNotFound {
        philosopher: PhilosopherId,
        fork: ForkId,
        kind: EdgeKind,
    },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}
