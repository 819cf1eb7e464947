//! Compile-time defaults
//!
//! Generated by `build.rs`, optionally merged with the file named by
//! `STRAND_CONFIG_RS`.

include!(concat!(env!("OUT_DIR"), "/strand_merged_config.rs"));
