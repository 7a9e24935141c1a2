pub mod reporter;
pub mod system;
