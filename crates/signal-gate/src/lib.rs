pub mod dataset;
pub mod gate;
pub mod model;
pub mod rebalance;
pub mod store;

pub use dataset::*;
pub use gate::*;
pub use model::*;
pub use rebalance::*;
pub use store::*;
