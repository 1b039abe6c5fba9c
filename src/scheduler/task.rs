use crate::ids::Operand;

/// Identifies the job and user closure a worker thread is currently
/// running. Carried through purely for logging and metrics context, not
/// for dispatch -- workers run in-process, so the closure itself travels
/// as an `Arc<dyn Fn>` rather than as bytes keyed by `function_id`.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub job_id: String,
    pub function_id: String,
}

/// A unary operator's unit of work: one source partition.
#[derive(Debug, Clone)]
pub struct UnaryTask {
    pub info: TaskInfo,
    pub source: Operand,
}

/// A binary operator's unit of work: the matching partition from each of
/// two tables with equal partition counts.
#[derive(Debug, Clone)]
pub struct BinaryTask {
    pub info: TaskInfo,
    pub left: Operand,
    pub right: Operand,
}
