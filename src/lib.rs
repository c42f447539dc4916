#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

pub mod cli;
pub mod error;

pub mod aggregate;
pub mod cache;
pub mod evidence;
pub mod extract;
pub mod model;
pub mod record;
pub mod summary;

mod render;
mod sources;
