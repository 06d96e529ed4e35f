pub mod rows;
pub mod schema;
pub mod store;

pub use rows::RunSummary;
pub use store::Store;
