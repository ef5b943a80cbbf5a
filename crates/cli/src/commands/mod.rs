pub mod data;
pub mod info;
pub mod schema;
