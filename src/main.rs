// Purpose: Binary entry point for the dependency manager.
// Inputs/Outputs: Reads process args and returns process exit code from CLI dispatcher.
// Invariants: Main must not bypass centralized CLI argument/diagnostic handling.
// Gotchas: Logger setup lives in `cli`, after verbosity flags are parsed.

fn main() {
    let code = vendr::cli::run_cli(std::env::args());
    std::process::exit(code);
}
