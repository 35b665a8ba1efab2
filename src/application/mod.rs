//! Orchestration: the task router, the resilience policy, the worker pools and the
//! admission-controlled dispatcher that ties them together.

pub mod dispatcher;
pub mod pool;
pub mod resilience;
pub mod router;
