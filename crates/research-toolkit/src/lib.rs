//! Built-in actions and presets for the deep research workflow engine.
//!
//! - [`builtin`]: `ls`, `read_file`, `write_file` and `edit_file` over the
//!   run's shared file store
//! - [`search`]: the `internet_search` action and its providers
//! - [`research`]: prompts and sub-agent definitions for a
//!   research / draft / critique loop

pub mod builtin;
pub mod research;
pub mod search;

pub use builtin::{
    filesystem_actions, EditFileAction, LsAction, ReadFileAction, WriteFileAction,
};
pub use research::{
    critique_sub_agent, research_instructions, research_sub_agent, research_sub_agents,
    timestamp_prefix,
};
pub use search::{
    InternetSearchAction, SearchHit, SearchProvider, SearchRequest, StaticSearch, TavilyConfig,
    TavilySearch,
};
