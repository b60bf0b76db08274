pub mod apply;
pub mod blocks;
pub mod package;
pub mod xml;
