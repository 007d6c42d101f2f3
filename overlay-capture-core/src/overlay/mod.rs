pub mod context;
pub mod source;
