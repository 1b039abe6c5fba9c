mod pool;
mod shared_sender;
mod task;

pub use pool::WorkerPool;
pub use shared_sender::SharedSender;
pub use task::{BinaryTask, TaskInfo, UnaryTask};
