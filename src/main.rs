// USAGE cargo run --release -- /path/to/folder

use nc_concat::{run, DEFAULT_OUTPUT};
use std::{env, path::Path, time::Instant};

// ─────────────────────────────────────────────────────────────────────
// Simple timing helper
// ─────────────────────────────────────────────────────────────────────
fn timeit<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let t0 = Instant::now();
    let out = f();
    eprintln!("{label:<20}{:?}", t0.elapsed());
    out
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <folder_path>", args[0]);
        std::process::exit(1);
    }

    timeit("concatenate", || run(Path::new(&args[1]), DEFAULT_OUTPUT));
}
