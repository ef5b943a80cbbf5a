//! SQL generation and parameter binding for the relational adapters

pub mod builder;
pub mod value;

pub use builder::SqlStatement;
pub use value::parameter_type;
