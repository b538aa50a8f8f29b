//! Cooperative shutdown signalling for worker loops and runs.

mod token;

pub use token::CancellationToken;
