//! Built-in actions available to every agent

pub mod filesystem;

pub use filesystem::{
    filesystem_actions, EditFileAction, LsAction, ReadFileAction, WriteFileAction,
};
