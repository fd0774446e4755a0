//! On-disk layout of the projection-mapping cache

pub mod datasets;
pub mod init;
pub mod schema;

pub use datasets::*;
pub use init::*;
