mod args;

pub use args::{Cli, CustomArgs, GlobalArgs, Profile};
