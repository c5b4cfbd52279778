// Purpose: Define crate-level module surface for the dependency manager.
// Inputs/Outputs: Re-exports internal modules for the binary and for tests.
// Invariants: The binary goes through `cli`; library callers build a `config::Config` themselves.
// Gotchas: Keep module wiring consistent with src/main.rs.

pub mod cli;
pub mod config;
pub mod pkg;
