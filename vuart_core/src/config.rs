use clap::Parser;

use crate::fifo::FIFO_SIZE;
use crate::ports::MAX_LINES;

#[derive(Parser, Debug, Clone)]
#[command(name = "vuart")]
#[command(version = "0.2.0")]
#[command(about = "Virtual 16550A UART emulator with a stdio echo host", long_about = None)]
pub struct HostConfig {
    /// Number of lines to bring up (COM1..COM4)
    #[arg(short, long, default_value = "1")]
    pub lines: u8,

    /// TX FIFO occupancy that triggers a flush to stdout (1-16)
    #[arg(short, long, default_value = "16")]
    pub threshold: usize,

    /// Put line 0 into internal loopback (MCR.LOOP)
    #[arg(long)]
    pub loopback: bool,

    /// Increase verbosity (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Disable metrics collection
    #[arg(long)]
    pub no_metrics: bool,
}

impl HostConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.lines == 0 {
            return Err("At least one line must be enabled".to_string());
        }

        if self.lines as usize > MAX_LINES {
            return Err(format!(
                "Too many lines. Maximum: {}, Got: {}",
                MAX_LINES, self.lines
            ));
        }

        if self.threshold == 0 || self.threshold > FIFO_SIZE {
            return Err(format!(
                "TX threshold must be between 1 and {}. Got: {}",
                FIFO_SIZE, self.threshold
            ));
        }

        Ok(())
    }

    /// Get tracing log level based on verbosity
    pub fn log_level(&self) -> &str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            lines: 1,
            threshold: FIFO_SIZE,
            loopback: false,
            verbose: 1,
            no_metrics: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = HostConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.log_level(), "info");
    }

    #[test]
    fn test_line_count_limits() {
        let mut config = HostConfig::default();
        config.lines = 0;
        assert!(config.validate().is_err());

        config.lines = MAX_LINES as u8;
        assert!(config.validate().is_ok());

        config.lines = MAX_LINES as u8 + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_limits() {
        let mut config = HostConfig::default();
        config.threshold = 0;
        assert!(config.validate().is_err());

        config.threshold = 1;
        assert!(config.validate().is_ok());

        config.threshold = FIFO_SIZE + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_levels() {
        let mut config = HostConfig::default();
        for (verbose, level) in [(0, "warn"), (1, "info"), (2, "debug"), (3, "trace"), (9, "trace")] {
            config.verbose = verbose;
            assert_eq!(config.log_level(), level);
        }
    }

    #[test]
    fn test_parse_from_args() {
        let config =
            HostConfig::try_parse_from(["vuart", "--lines", "2", "-t", "4", "--loopback", "-vv"])
                .unwrap();
        assert_eq!(config.lines, 2);
        assert_eq!(config.threshold, 4);
        assert!(config.loopback);
        assert_eq!(config.log_level(), "debug");
        assert!(!config.no_metrics);
    }
}
