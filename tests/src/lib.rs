//! Test suite for the rejit crates.

#[cfg(test)]
mod backend;
#[cfg(test)]
mod core;
#[cfg(test)]
mod exec;
