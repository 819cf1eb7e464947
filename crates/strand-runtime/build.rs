//! Build script for strand-runtime
//!
//! Produces `OUT_DIR/strand_merged_config.rs`, the compile-time defaults
//! that `config::defaults` includes. A user file named by `STRAND_CONFIG_RS`
//! may override any subset of them with lines of the form
//!
//! ```text
//! pub const STACK_SIZE: usize = 128 * 1024;
//! ```
//!
//! Unknown names produce a cargo warning and are otherwise ignored.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

struct Param {
    name: &'static str,
    ty: &'static str,
    default: &'static str,
}

const PARAMS: &[Param] = &[
    Param { name: "STACK_SIZE", ty: "usize", default: "256 * 1024" },
    Param { name: "GUARD_PAGES", ty: "bool", default: "true" },
    Param { name: "HEAP_STACKS", ty: "bool", default: "false" },
    Param { name: "STACK_CACHE", ty: "usize", default: "64" },
    Param { name: "USE_RING_QUEUE", ty: "bool", default: "false" },
    Param { name: "READY_QUEUE_CAPACITY", ty: "usize", default: "1024" },
    Param { name: "POLL_EVENTS", ty: "usize", default: "256" },
    Param { name: "INJECT_CAPACITY", ty: "usize", default: "1024" },
    Param { name: "DEBUG_LOGGING", ty: "bool", default: "false" },
];

fn main() {
    println!("cargo:rerun-if-env-changed=STRAND_CONFIG_RS");

    let mut values: BTreeMap<&'static str, String> = PARAMS
        .iter()
        .map(|p| (p.name, p.default.to_string()))
        .collect();

    let user = env::var("STRAND_CONFIG_RS").ok();
    if let Some(path) = &user {
        println!("cargo:rerun-if-changed={}", path);
        match fs::read_to_string(path) {
            Ok(text) => {
                for (name, value) in overrides(&text) {
                    match PARAMS.iter().find(|p| p.name == name) {
                        Some(p) => {
                            values.insert(p.name, value);
                        }
                        None => println!("cargo:warning=unknown strand config constant {}", name),
                    }
                }
                println!("cargo:warning=strand: compile-time config from {}", path);
            }
            Err(e) => println!("cargo:warning=cannot read STRAND_CONFIG_RS {}: {}", path, e),
        }
    }

    let mut out = String::from("// Generated by strand-runtime/build.rs\n");
    if let Some(path) = &user {
        out.push_str(&format!("// Overrides taken from {}\n", path));
    }
    out.push('\n');
    for p in PARAMS {
        out.push_str(&format!("pub const {}: {} = {};\n", p.name, p.ty, values[p.name]));
    }

    let dest = Path::new(&env::var("OUT_DIR").expect("cargo sets OUT_DIR")).join("strand_merged_config.rs");
    fs::write(&dest, out).expect("write merged config");
}

/// Extract `(NAME, VALUE)` pairs from `pub const NAME: TYPE = VALUE;` lines
fn overrides(text: &str) -> Vec<(String, String)> {
    text.lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("pub const "))
        .filter_map(|rest| {
            let (name, tail) = rest.split_once(':')?;
            let (_, value) = tail.split_once('=')?;
            let value = value.trim().trim_end_matches(';').trim();
            Some((name.trim().to_string(), value.to_string()))
        })
        .collect()
}
