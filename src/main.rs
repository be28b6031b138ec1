//! dolt utility - main entrypoint
// (c) 2026 Dolt Authors

use std::process::ExitCode;

use mimalloc::MiMalloc;
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> ExitCode {
    dolt::main()
}
