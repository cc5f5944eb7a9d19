mod commands;
mod parse;

pub(crate) use commands::{dispatch, usage};
