pub mod cancellation;
pub mod latch;
pub mod retry;
