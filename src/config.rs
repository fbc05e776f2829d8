//! Environment-driven configuration.
//!
//! | variable | effect |
//! |---|---|
//! | `ELTWISE_JIT_MAX_ISA` | cap on the width class picked by `EltwiseKernel::build` (`sse41`, `avx2`, `avx512`) |
//! | `ELTWISE_JIT_DUMP` | directory receiving every generated code region as a `.bin` file |
//! | `ELTWISE_JIT_PARALLEL_THRESHOLD` | element count below which `run_parallel` stays on the calling thread |
//!
//! Read once per process. Invalid values are logged and ignored.

use std::path::PathBuf;
use std::sync::OnceLock;

use crate::dispatch::VectorWidth;

pub const ENV_MAX_ISA: &str = "ELTWISE_JIT_MAX_ISA";
pub const ENV_DUMP: &str = "ELTWISE_JIT_DUMP";
pub const ENV_PARALLEL_THRESHOLD: &str = "ELTWISE_JIT_PARALLEL_THRESHOLD";

/// Default element count below which dispatch does not fork.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 32 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitConfig {
    pub max_width: Option<VectorWidth>,
    pub dump_dir: Option<PathBuf>,
    pub parallel_threshold: usize,
}

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig {
            max_width: None,
            dump_dir: None,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

impl JitConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, so parsing is testable without
    /// touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = JitConfig::default();

        if let Some(raw) = lookup(ENV_MAX_ISA) {
            match raw.parse::<VectorWidth>() {
                Ok(w) => cfg.max_width = Some(w),
                Err(err) => log::warn!("{ENV_MAX_ISA} ignored: {err}"),
            }
        }

        if let Some(raw) = lookup(ENV_DUMP) {
            if !raw.trim().is_empty() {
                cfg.dump_dir = Some(PathBuf::from(raw));
            }
        }

        if let Some(raw) = lookup(ENV_PARALLEL_THRESHOLD) {
            match raw.trim().parse::<usize>() {
                Ok(n) => cfg.parallel_threshold = n,
                Err(err) => log::warn!("{ENV_PARALLEL_THRESHOLD}='{raw}' ignored: {err}"),
            }
        }

        cfg
    }
}

static CONFIG: OnceLock<JitConfig> = OnceLock::new();

/// Process-wide configuration (read from the environment on first use).
pub fn jit_config() -> &'static JitConfig {
    CONFIG.get_or_init(JitConfig::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = JitConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg, JitConfig::default());
    }

    #[test]
    fn test_parse_all() {
        let cfg = JitConfig::from_lookup(lookup(&[
            (ENV_MAX_ISA, "avx2"),
            (ENV_DUMP, "/tmp/jit"),
            (ENV_PARALLEL_THRESHOLD, "100"),
        ]));
        assert_eq!(cfg.max_width, Some(VectorWidth::Medium));
        assert_eq!(cfg.dump_dir, Some(PathBuf::from("/tmp/jit")));
        assert_eq!(cfg.parallel_threshold, 100);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let cfg = JitConfig::from_lookup(lookup(&[
            (ENV_MAX_ISA, "sve2"),
            (ENV_DUMP, "  "),
            (ENV_PARALLEL_THRESHOLD, "lots"),
        ]));
        assert_eq!(cfg, JitConfig::default());
    }
}
