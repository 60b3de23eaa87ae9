pub mod ping;
pub mod scan;
pub mod version;
