mod archive;
mod depend;
mod describe;
mod mounts;
mod parse;
mod patches;

pub use archive::cmd_archive;
pub use depend::cmd_depend;
pub use describe::{cmd_describe, cmd_tags};
pub use mounts::cmd_mounts;
pub use parse::cmd_parse;
pub use patches::cmd_patches;
