pub mod cli;
pub mod hmm;
pub mod index;
pub mod io;
pub mod search;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
