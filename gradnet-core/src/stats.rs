/// Instrumentation counters owned by one interpreter.
///
/// Deliberately not process-wide: each [`crate::Runtime`] carries its own
/// context, so multi-worker setups with one interpreter per worker never
/// share mutable state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub forward_passes: u64,
    pub backward_passes: u64,
    pub op_invocations: u64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }
}
