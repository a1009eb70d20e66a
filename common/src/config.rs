//! Configuration types for runtime and output settings

/// Runtime configuration for tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

impl OutputConfig {
    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.quiet && self.verbose > 0 {
            return Err("--quiet and --verbose cannot be used together".to_string());
        }
        Ok(())
    }

    /// Level of the default log filter.
    ///
    /// `None` disables logging entirely.
    pub fn level(&self) -> Option<tracing::Level> {
        if self.quiet {
            return None;
        }
        Some(match self.verbose {
            0 => tracing::Level::ERROR,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        })
    }

    /// Summary is printed when asked for or implied by verbosity.
    pub fn wants_summary(&self) -> bool {
        !self.quiet && (self.print_summary || self.verbose > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        let mut output = OutputConfig::default();
        assert_eq!(output.level(), Some(tracing::Level::ERROR));
        output.verbose = 1;
        assert_eq!(output.level(), Some(tracing::Level::INFO));
        output.verbose = 2;
        assert_eq!(output.level(), Some(tracing::Level::DEBUG));
        output.verbose = 7;
        assert_eq!(output.level(), Some(tracing::Level::TRACE));
    }

    #[test]
    fn quiet_disables_logging_and_summary() {
        let output = OutputConfig {
            quiet: true,
            verbose: 0,
            print_summary: true,
        };
        assert_eq!(output.level(), None);
        assert!(!output.wants_summary());
        assert!(output.validate().is_ok());
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        let output = OutputConfig {
            quiet: true,
            verbose: 1,
            print_summary: false,
        };
        assert!(output.validate().is_err());
    }

    #[test]
    fn verbose_implies_summary() {
        let output = OutputConfig {
            quiet: false,
            verbose: 1,
            print_summary: false,
        };
        assert!(output.wants_summary());
    }
}
