// magchess_host/src/lib.rs
// Host-side pieces of the simulator: calibration files, the console command
// source and JSON status snapshots.

pub mod configfile;
pub mod console;
pub mod status;
