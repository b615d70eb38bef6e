//! MTProto transport abstraction (the client itself lives in adapter crates).

pub mod port;
pub mod throttled;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;
