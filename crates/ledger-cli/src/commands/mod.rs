pub mod address;
pub mod common;
pub mod scan;
pub mod sign;
pub mod version;
