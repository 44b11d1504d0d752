mod build;
mod hash;
mod list;

pub use build::{BuildArgs, cmd_build};
pub use hash::cmd_hash;
pub use list::cmd_list;
