pub mod connector;
pub mod pipe;
