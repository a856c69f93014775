pub mod dataset;
pub mod datum;
pub mod version;
