//! Concurrency primitives shared by every edge: per-key read/write locks
//! and bounded work queues feeding the processor tasks.

pub mod perkey_rwlock;
pub mod work_queue;

pub use perkey_rwlock::PerKeyRwLock;
pub use work_queue::{PopOutcome, QueueError, WorkReceiver, WorkSender, work_queue};
