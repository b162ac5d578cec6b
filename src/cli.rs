//! CLI domain: parse, route, output, and presentation only.
//! No clustering logic; the route table dispatches to sessions and formatters.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::map_error;
pub use parse::{Cli, Commands};
pub use presentation::{format_entries, format_stats, TreeStats};
pub use route::{parse_entries, parse_names, RunContext};
