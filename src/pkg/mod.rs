// Purpose: Dependency-management core: manifest, VCS, cache, resolver, installer and lock.
// Inputs/Outputs: Exposes the components the CLI actions compose into one run.
// Invariants: Only `actions` knows about project layout; lower modules take explicit paths.
// Gotchas: `testutil` exists only under cfg(test) and must not leak into the public surface.

pub mod actions;
pub mod cache;
pub mod constraint;
pub mod error;
pub mod fsutil;
pub mod importer;
pub mod install;
pub mod lockfile;
pub mod manifest;
pub mod resolve;
pub mod vcs;

#[cfg(test)]
pub mod testutil;
