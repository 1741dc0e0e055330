pub mod demo;
pub mod join;
