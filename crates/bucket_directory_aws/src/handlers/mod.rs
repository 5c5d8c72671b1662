pub mod apply;
pub mod direct;
pub mod directory;
