pub mod effects;
pub mod highway;
pub mod judgment;
pub mod mods;
pub mod note;
pub mod parsing;
pub mod play;
