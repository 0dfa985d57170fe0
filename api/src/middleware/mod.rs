pub mod cors;
pub mod origin;
