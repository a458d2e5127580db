/// Marker a provider embeds in a job result to report a benchmark score.
pub const BENCHMARK_MARKER: &str = "BENCHMARK_SCORE:";

/// Classification of a `JOB_RESULT` payload.
///
/// Benchmark reports are recognised purely by the textual marker. Callers
/// should only ever branch on this type so the tagging scheme can later move
/// into a structured payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Completion,
    Benchmark { score: i64 },
}

impl ResultKind {
    /// A result containing the marker is a benchmark. The text between the
    /// first marker and the next one (or the end) is trimmed and parsed; an
    /// unparsable score counts as `0`.
    pub fn classify(result: &str) -> Self {
        let Some((_, rest)) = result.split_once(BENCHMARK_MARKER) else {
            return ResultKind::Completion;
        };
        let raw = rest.split(BENCHMARK_MARKER).next().unwrap_or_default();
        let score = raw.trim().parse::<i64>().unwrap_or(0);
        ResultKind::Benchmark { score }
    }

    pub fn is_benchmark(&self) -> bool {
        matches!(self, ResultKind::Benchmark { .. })
    }
}
