mod parse;
mod toml;

pub use {
  parse::{build_settings, parse_opts, ListenConfig},
  toml::ConfigToml,
};
