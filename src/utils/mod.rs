//! Small shared helpers that don't belong to any one subsystem.

pub mod ids;
