pub mod agent;
pub mod cancel;
pub mod circuit_breaker;
pub mod error;
pub mod retry;
pub mod verification;
