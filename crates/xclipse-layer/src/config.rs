//! Layer configuration.
//!
//! Defaults suit the Xclipse 940 (RDNA-derived, 64-byte cache lines). Every knob can be overridden
//! from the environment so a user can turn individual rewrite rules off without rebuilding:
//!
//! - `XCLIPSE_LAYER_DISABLE=1`: forward every call untouched.
//! - `XCLIPSE_LAYER_KEEP_CULL_MODE=1`: do not force back-face culling.
//! - `XCLIPSE_LAYER_KEEP_SAMPLES=1`: do not clamp MSAA sample counts.
//! - `XCLIPSE_LAYER_NO_ALLOC_PADDING=1`: do not pad memory allocations.
//! - `XCLIPSE_LAYER_NO_CLASSIFY=1`: skip submission classification.
//! - `XCLIPSE_LAYER_MAX_SAMPLES=<n>`: MSAA clamp (power of two, 1..=64).
//! - `XCLIPSE_LAYER_ALLOC_ALIGNMENT=<bytes>`: allocation padding granule (power of two).
//! - `XCLIPSE_LAYER_LOG=<filter>`: `tracing-subscriber` `EnvFilter` directive used by
//!   [`crate::logging::init`].

use bitflags::bitflags;

use crate::error::{LayerError, Result};

pub const DISABLE_ENV: &str = "XCLIPSE_LAYER_DISABLE";
pub const KEEP_CULL_MODE_ENV: &str = "XCLIPSE_LAYER_KEEP_CULL_MODE";
pub const KEEP_SAMPLES_ENV: &str = "XCLIPSE_LAYER_KEEP_SAMPLES";
pub const NO_ALLOC_PADDING_ENV: &str = "XCLIPSE_LAYER_NO_ALLOC_PADDING";
pub const NO_CLASSIFY_ENV: &str = "XCLIPSE_LAYER_NO_CLASSIFY";
pub const MAX_SAMPLES_ENV: &str = "XCLIPSE_LAYER_MAX_SAMPLES";
pub const ALLOC_ALIGNMENT_ENV: &str = "XCLIPSE_LAYER_ALLOC_ALIGNMENT";
pub const LOG_ENV: &str = "XCLIPSE_LAYER_LOG";

/// Cache line size of the Xclipse 940.
pub const DEFAULT_ALLOCATION_ALIGNMENT: u64 = 64;
pub const DEFAULT_MAX_SAMPLE_COUNT: u32 = 4;
pub const DEFAULT_LOG_FILTER: &str = "warn";

bitflags! {
    /// Rewrite rules applied to intercepted create-info structures.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct RewriteRules: u32 {
        /// Replace `cullMode == NONE` with back-face culling.
        const CULL_MODE = 1 << 0;
        /// Clamp `rasterizationSamples` to [`LayerConfig::max_sample_count`].
        const SAMPLE_COUNT = 1 << 1;
        /// Round `allocationSize` up to [`LayerConfig::allocation_alignment`].
        const ALLOCATION_PADDING = 1 << 2;
    }
}

impl Default for RewriteRules {
    fn default() -> Self {
        Self::all()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerConfig {
    /// When false the layer is a pure pass-through; nothing is rewritten or recorded.
    pub enabled: bool,
    pub rules: RewriteRules,
    pub max_sample_count: u32,
    pub allocation_alignment: u64,
    pub classify_submissions: bool,
    pub log_filter: String,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: RewriteRules::default(),
            max_sample_count: DEFAULT_MAX_SAMPLE_COUNT,
            allocation_alignment: DEFAULT_ALLOCATION_ALIGNMENT,
            classify_submissions: true,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl LayerConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by `lookup(env_var_name)`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let truthy = |name: &str| lookup(name).is_some_and(|raw| is_truthy(&raw));

        let mut config = Self::default();
        config.enabled = !truthy(DISABLE_ENV);
        config.classify_submissions = !truthy(NO_CLASSIFY_ENV);

        for (env, rule) in [
            (KEEP_CULL_MODE_ENV, RewriteRules::CULL_MODE),
            (KEEP_SAMPLES_ENV, RewriteRules::SAMPLE_COUNT),
            (NO_ALLOC_PADDING_ENV, RewriteRules::ALLOCATION_PADDING),
        ] {
            if truthy(env) {
                config.rules.remove(rule);
            }
        }

        if let Some(raw) = lookup(MAX_SAMPLES_ENV) {
            config.max_sample_count = raw.trim().parse().map_err(|_| {
                LayerError::InvalidConfig("XCLIPSE_LAYER_MAX_SAMPLES is not an integer")
            })?;
        }
        if let Some(raw) = lookup(ALLOC_ALIGNMENT_ENV) {
            config.allocation_alignment = raw.trim().parse().map_err(|_| {
                LayerError::InvalidConfig("XCLIPSE_LAYER_ALLOC_ALIGNMENT is not an integer")
            })?;
        }
        if let Some(raw) = lookup(LOG_ENV) {
            let raw = raw.trim();
            if !raw.is_empty() {
                config.log_filter = raw.to_string();
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.max_sample_count.is_power_of_two() || self.max_sample_count > 64 {
            return Err(LayerError::InvalidConfig(
                "max_sample_count must be a power of two in 1..=64",
            ));
        }
        if !self.allocation_alignment.is_power_of_two() {
            return Err(LayerError::InvalidConfig(
                "allocation_alignment must be a non-zero power of two",
            ));
        }
        Ok(())
    }
}

fn is_truthy(raw: &str) -> bool {
    let v = raw.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}
