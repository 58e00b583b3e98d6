mod job_lock;

pub use job_lock::{JobLock, JobLockGuard};
