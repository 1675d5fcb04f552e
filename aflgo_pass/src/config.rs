//! Options and environment knobs of a pass run.

use core::fmt::{self, Display};
use std::path::PathBuf;

use aflgo_bolts::Error;
use typed_builder::TypedBuilder;

/// Probability, in percent, that a coverage probe is placed at a site
pub const AFL_INST_RATIO: &str = "AFL_INST_RATIO";
/// Probability, in percent, that a distance probe is placed at a site
pub const AFLGO_INST_RATIO: &str = "AFLGO_INST_RATIO";
/// Set to 1 to only instrument blocks with a known distance
pub const AFLGO_SELECTIVE: &str = "AFLGO_SELECTIVE";
/// Silences banner and summary
pub const AFL_QUIET: &str = "AFL_QUIET";
/// The build is hardened
pub const AFL_HARDEN: &str = "AFL_HARDEN";
/// The build uses `AddressSanitizer`
pub const AFL_USE_ASAN: &str = "AFL_USE_ASAN";
/// The build uses `MemorySanitizer`
pub const AFL_USE_MSAN: &str = "AFL_USE_MSAN";

/// The input files a run is given.
///
/// Which of them are present decides the [`crate::mode::Mode`].
#[derive(Debug, Clone, Default, PartialEq, Eq, TypedBuilder)]
pub struct PassOptions {
    /// Fuzzing targets, one `path:line` per line; selects preprocessing
    #[builder(default = None, setter(strip_option, into))]
    pub targets: Option<PathBuf>,
    /// Precomputed block distances; selects distance instrumentation
    #[builder(default = None, setter(strip_option, into))]
    pub distance: Option<PathBuf>,
    /// Where preprocessing writes its artifacts
    #[builder(default = None, setter(strip_option, into))]
    pub outdir: Option<PathBuf>,
    /// Automaton events, `path:line:code`
    #[builder(default = None, setter(strip_option, into))]
    pub revents: Option<PathBuf>,
    /// Protocol propositions, `path:line:name`
    #[builder(default = None, setter(strip_option, into))]
    pub pevents: Option<PathBuf>,
}

/// How the instrumented program is being built, for the summary line only
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HardeningMode {
    /// `AFL_HARDEN`
    Hardened,
    /// `AFL_USE_ASAN` or `AFL_USE_MSAN`
    Sanitized,
    /// Neither
    #[default]
    NonHardened,
}

impl Display for HardeningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HardeningMode::Hardened => "hardened",
            HardeningMode::Sanitized => "ASAN/MSAN",
            HardeningMode::NonHardened => "non-hardened",
        })
    }
}

/// Settings read from the environment, once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvConfig {
    /// Coverage probe ratio, 1..=100
    pub inst_ratio: u32,
    /// Distance probe ratio, 1..=100
    pub dinst_ratio: u32,
    /// Skip every located block without a distance
    pub selective: bool,
    /// No banner, no summary
    pub quiet: bool,
    /// Informational
    pub hardening: HardeningMode,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            inst_ratio: 100,
            dinst_ratio: 100,
            selective: false,
            quiet: false,
            hardening: HardeningMode::NonHardened,
        }
    }
}

fn parse_ratio(name: &str, value: Option<String>) -> Result<u32, Error> {
    let Some(value) = value else {
        return Ok(100);
    };
    match value.trim().parse::<u32>() {
        Ok(ratio) if (1..=100).contains(&ratio) => Ok(ratio),
        _ => Err(Error::illegal_argument(format!(
            "Bad value of {name} (must be between 1 and 100)"
        ))),
    }
}

impl EnvConfig {
    /// Reads the settings through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let inst_ratio = parse_ratio(AFL_INST_RATIO, lookup(AFL_INST_RATIO))?;
        let dinst_ratio = parse_ratio(AFLGO_INST_RATIO, lookup(AFLGO_INST_RATIO))?;
        let selective = match lookup(AFLGO_SELECTIVE).as_deref().map(str::trim) {
            None | Some("0") => false,
            Some("1") => true,
            Some(_) => {
                return Err(Error::illegal_argument(format!(
                    "Bad value of {AFLGO_SELECTIVE} (must be 0 or 1)"
                )))
            }
        };
        let hardening = if lookup(AFL_HARDEN).is_some() {
            HardeningMode::Hardened
        } else if lookup(AFL_USE_ASAN).is_some() || lookup(AFL_USE_MSAN).is_some() {
            HardeningMode::Sanitized
        } else {
            HardeningMode::NonHardened
        };
        Ok(Self {
            inst_ratio,
            dinst_ratio,
            selective,
            quiet: lookup(AFL_QUIET).is_some(),
            hardening,
        })
    }

    /// Reads the settings from the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}
