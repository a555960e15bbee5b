//! Processor-wide settings that are not part of an individual request.

use std::path::PathBuf;

/// Environment variable naming an external package conformance checker.
pub const EPUBCHECK_ENV: &str = "STRUCTURAL_EPUBCHECK";

/// Resource limits applied by the secure XML reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserLimits {
    /// Maximum element nesting depth.
    pub max_depth: usize,
    /// Maximum number of attributes on a single element.
    pub max_attributes: usize,
    /// Maximum number of elements in one parsed document.
    pub max_elements: usize,
    /// Maximum nesting of XInclude inclusions.
    pub max_include_depth: usize,
    /// Maximum size of a single input document in bytes.
    pub max_document_bytes: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_depth: 256,
            max_attributes: 256,
            max_elements: 1_000_000,
            max_include_depth: 16,
            max_document_bytes: 64 * 1024 * 1024,
        }
    }
}

/// How a produced package is checked for conformance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConformanceCheck {
    /// Structural checks performed in-process.
    #[default]
    Builtin,
    /// Run an external program with the archive path as its final argument.
    External { program: PathBuf, args: Vec<String> },
    Disabled,
}

/// Configuration shared by every stage of a [`Processor`](crate::Processor).
#[derive(Debug, Clone, Default)]
pub struct ProcessorConfig {
    pub limits: ParserLimits,
    /// Compression level for deflated package entries (1-9, default 6).
    pub compression_level: Option<u32>,
    pub conformance: ConformanceCheck,
}

impl ProcessorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration honouring [`EPUBCHECK_ENV`].
    ///
    /// A value of `none` or `off` disables conformance checking; any other
    /// non-empty value names the checker program.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(EPUBCHECK_ENV) {
            config.conformance = conformance_from_setting(&value);
        }
        config
    }

    pub fn with_limits(mut self, limits: ParserLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = Some(level.clamp(1, 9));
        self
    }

    pub fn with_conformance(mut self, conformance: ConformanceCheck) -> Self {
        self.conformance = conformance;
        self
    }
}

fn conformance_from_setting(value: &str) -> ConformanceCheck {
    let value = value.trim();
    match value {
        "" => ConformanceCheck::Builtin,
        "none" | "off" => ConformanceCheck::Disabled,
        program => ConformanceCheck::External {
            program: PathBuf::from(program),
            args: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conformance_setting() {
        assert_eq!(conformance_from_setting(""), ConformanceCheck::Builtin);
        assert_eq!(conformance_from_setting(" off "), ConformanceCheck::Disabled);
        assert_eq!(
            conformance_from_setting("/usr/bin/epubcheck"),
            ConformanceCheck::External {
                program: PathBuf::from("/usr/bin/epubcheck"),
                args: Vec::new()
            }
        );
    }

    #[test]
    fn test_compression_level_is_clamped() {
        let config = ProcessorConfig::new().with_compression_level(12);
        assert_eq!(config.compression_level, Some(9));
    }
}
