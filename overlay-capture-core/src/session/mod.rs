pub mod controller;
pub(crate) mod pipeline;
pub(crate) mod recording;
