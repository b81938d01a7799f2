//! Command line parsing
//!
//! ```text
//! modhost [--config FILE] [--frames N] [--frame-ms MS] MODULE...
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const USAGE: &str = "usage: modhost [--config FILE] [--frames N] [--frame-ms MS] MODULE...";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgsError {
    #[error("missing value for {0}")]
    MissingValue(String),

    #[error("invalid value '{value}' for {flag}")]
    InvalidValue { flag: String, value: String },

    #[error("unknown option {0}")]
    UnknownOption(String),

    #[error("no modules given")]
    NoModules,
}

/// Parsed shell arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    /// Explicit config file; otherwise the usual lookup applies
    pub config: Option<PathBuf>,
    /// Stop after this many frames; run until Ctrl+C if unset
    pub frames: Option<u64>,
    pub frame_time: Duration,
    pub modules: Vec<PathBuf>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: None,
            frames: None,
            frame_time: Duration::from_millis(16),
            modules: Vec::new(),
        }
    }
}

fn value<I: Iterator<Item = String>>(flag: &str, iter: &mut I) -> Result<String, ArgsError> {
    iter.next().ok_or_else(|| ArgsError::MissingValue(flag.to_string()))
}

fn number(flag: &str, value: String) -> Result<u64, ArgsError> {
    value.parse().map_err(|_| ArgsError::InvalidValue {
        flag: flag.to_string(),
        value,
    })
}

impl Args {
    /// Parse arguments, not including the program name
    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self::default();
        let mut iter = args.into_iter();

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => parsed.config = Some(PathBuf::from(value(&arg, &mut iter)?)),
                "--frames" => parsed.frames = Some(number(&arg, value(&arg, &mut iter)?)?),
                "--frame-ms" => {
                    let millis = number(&arg, value(&arg, &mut iter)?)?;
                    parsed.frame_time = Duration::from_millis(millis);
                }
                flag if flag.starts_with("--") => return Err(ArgsError::UnknownOption(arg)),
                _ => parsed.modules.push(PathBuf::from(arg)),
            }
        }

        if parsed.modules.is_empty() {
            return Err(ArgsError::NoModules);
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_full() {
        let parsed = Args::parse(args(&[
            "--config",
            "host.toml",
            "--frames",
            "120",
            "--frame-ms",
            "8",
            "libgame.so",
            "libui.so",
        ]))
        .unwrap();

        assert_eq!(parsed.config, Some(PathBuf::from("host.toml")));
        assert_eq!(parsed.frames, Some(120));
        assert_eq!(parsed.frame_time, Duration::from_millis(8));
        assert_eq!(parsed.modules, vec![PathBuf::from("libgame.so"), PathBuf::from("libui.so")]);
    }

    #[test]
    fn test_parse_defaults() {
        let parsed = Args::parse(args(&["libgame.so"])).unwrap();
        assert_eq!(parsed.config, None);
        assert_eq!(parsed.frames, None);
        assert_eq!(parsed.frame_time, Duration::from_millis(16));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Args::parse(args(&[])), Err(ArgsError::NoModules));
        assert_eq!(
            Args::parse(args(&["libgame.so", "--frames"])),
            Err(ArgsError::MissingValue("--frames".into()))
        );
        assert_eq!(
            Args::parse(args(&["--frames", "lots", "libgame.so"])),
            Err(ArgsError::InvalidValue {
                flag: "--frames".into(),
                value: "lots".into()
            })
        );
        assert_eq!(
            Args::parse(args(&["--verbose", "libgame.so"])),
            Err(ArgsError::UnknownOption("--verbose".into()))
        );
    }
}
