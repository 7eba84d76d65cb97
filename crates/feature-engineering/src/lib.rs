pub mod builder;
pub mod regime;
pub mod schema;

pub use builder::*;
pub use regime::*;
pub use schema::*;
