//! Crate-internal tests.

mod lifecycle_behaviour;
mod support;
