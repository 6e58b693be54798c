//! `LOG_LEVEL` → `tracing_subscriber::EnvFilter` (`spec.md` §6).
//!
//! Installed once, in the binary only — library code never calls this, so an
//! embedding host keeps control of its own subscriber (`SPEC_FULL.md` §B).

use tracing_subscriber::EnvFilter;

const ENV_VAR: &str = "LOG_LEVEL";
const DEFAULT_LEVEL: &str = "INFO";

fn filter_directive() -> String {
    let level = std::env::var(ENV_VAR).unwrap_or_else(|_| DEFAULT_LEVEL.to_string());
    let level = match level.to_ascii_uppercase().as_str() {
        "DEBUG" => "debug",
        "WARN" => "warn",
        "ERROR" => "error",
        _ => "info",
    };
    format!("regmirror={level}")
}

pub fn init_tracing() {
    let filter = EnvFilter::try_new(filter_directive()).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_level_falls_back_to_info() {
        unsafe {
            std::env::remove_var(ENV_VAR);
        }
        assert_eq!(filter_directive(), "regmirror=info");
    }
}
