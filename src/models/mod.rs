pub mod example;
pub mod query;
pub mod schema;

pub use example::*;
pub use query::*;
pub use schema::*;
