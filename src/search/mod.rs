//! Profile-guided graph search over the k-mer index.

pub mod astar;
pub mod cancel;
pub mod contig;
pub mod driver;
pub mod enumerator;
pub mod kbest;
pub mod node;
pub mod walker;
pub mod weight;

pub use astar::{HmmGraphSearch, SearchOutcome, SearchParams};
pub use cancel::CancelToken;
pub use contig::AssembledPath;
pub use driver::{DirectionResult, DriverConfig, SearchDriver, SearchStats, SeedResult};
pub use kbest::KBestResult;
pub use walker::{Direction, GraphWalker};
pub use weight::WeightPolicy;
