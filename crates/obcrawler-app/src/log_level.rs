use clap::{builder::PossibleValue, ValueEnum};
use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

/// Standard log levels, or an arbitrary `tracing-subscriber` filter string.
#[derive(Debug, Clone)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    Filter(String),
}

impl LogLevel {
    pub fn as_str(&self) -> &str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
            LogLevel::Filter(s) => s.as_str(),
        }
    }

    /// Presumably we _want_ to see any parse failure, so this fails loudly
    /// rather than falling back to a default filter.
    pub fn to_filter(&self) -> anyhow::Result<EnvFilter> {
        Ok(EnvFilter::try_new(self.as_str())?)
    }
}

static VARIANTS: Lazy<Vec<LogLevel>> = Lazy::new(|| {
    vec![
        LogLevel::Off,
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ]
});

impl ValueEnum for LogLevel {
    fn value_variants<'a>() -> &'a [Self] {
        &VARIANTS
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        if let LogLevel::Filter(_) = self {
            None
        } else {
            Some(PossibleValue::new(self.as_str().to_string()))
        }
    }
}

pub fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    if let Ok(lvl) = ValueEnum::from_str(s, true) {
        return Ok(lvl);
    }
    // `EnvFilter` is not `Clone`, so we can't store it, but we can use it
    // to validate the string early.
    if let Err(e) = EnvFilter::try_new(s) {
        Err(e.to_string())
    } else {
        Ok(LogLevel::Filter(s.to_string()))
    }
}
