pub mod fastx;
pub mod output;
pub mod run_info;
pub mod seeds;
pub mod threads;
