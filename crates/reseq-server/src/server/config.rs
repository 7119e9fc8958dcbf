use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use reseq::CoordinatorConfig;

/// Runtime configuration for the `reseq-server` binary.
///
/// These settings control the concurrency, buffering, and framing behavior of
/// the request server. All values are parsed from CLI arguments or
/// environment variables, with defaults suitable for local use.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "reseq-server",
    version,
    about = "A line-oriented request server that replies in request order"
)]
pub struct CliArgs {
    /// Number of worker tasks processing requests concurrently.
    ///
    /// Requests from every connection are distributed round-robin across
    /// these workers, so replies complete out of order and are re-sequenced
    /// per connection.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 4)]
    pub num_workers: usize,

    /// Capacity of each worker's request queue.
    ///
    /// Environment variable: `WORK_BUFFER_SIZE`
    #[arg(long, env = "WORK_BUFFER_SIZE", default_value_t = 1)]
    pub work_buffer_size: usize,

    /// Maximum number of requests a single connection may have in flight.
    ///
    /// Once reached, the server stops reading from that connection until the
    /// oldest reply has been written. This also bounds the connection's
    /// reordering buffers.
    ///
    /// Environment variable: `MAX_INFLIGHT`
    #[arg(long, env = "MAX_INFLIGHT", default_value_t = 64)]
    pub max_inflight: usize,

    /// Maximum length of a request line in bytes.
    ///
    /// Environment variable: `MAX_LINE_LENGTH`
    #[arg(long, env = "MAX_LINE_LENGTH", default_value_t = 8192)]
    pub max_line_length: usize,

    /// Upper bound accepted for `SLEEP <ms>` requests.
    ///
    /// Environment variable: `MAX_SLEEP_MS`
    #[arg(long, env = "MAX_SLEEP_MS", default_value_t = 10_000)]
    pub max_sleep_ms: u64,

    /// Warn when a connection has pending replies but released nothing for
    /// this many milliseconds. `0` disables stall detection.
    ///
    /// Environment variable: `STALL_TIMEOUT_MS`
    #[arg(long, env = "STALL_TIMEOUT_MS", default_value_t = 0)]
    pub stall_timeout_ms: u64,

    /// Seconds to wait for open connections to finish during shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 5)]
    pub shutdown_timeout: u64,

    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:7878" or "/tmp/reseq.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:7878"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub num_workers: usize,
    pub work_buffer_size: usize,
    pub max_inflight: usize,
    pub max_line_length: usize,
    pub max_sleep: Duration,
    pub stall_timeout: Option<Duration>,
    pub shutdown_timeout: Duration,
    pub server_addr: String,
    pub uds: bool,
}

impl ServerConfig {
    /// Coordinator settings for one connection.
    pub fn coordinator(&self) -> CoordinatorConfig {
        let config = CoordinatorConfig::new().with_capacity(self.max_inflight);
        match self.stall_timeout {
            Some(timeout) => config.with_stall_timeout(timeout),
            None => config,
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }

        if args.work_buffer_size == 0 {
            bail!("WORK_BUFFER_SIZE must be greater than 0");
        }

        // Permits are acquired in bulk as a `u32` when draining a connection.
        if args.max_inflight == 0 || u32::try_from(args.max_inflight).is_err() {
            bail!(
                "MAX_INFLIGHT ({}) must be between 1 and {}",
                args.max_inflight,
                u32::MAX
            );
        }

        if args.max_line_length == 0 {
            bail!("MAX_LINE_LENGTH must be greater than 0");
        }

        Ok(Self {
            num_workers: args.num_workers,
            work_buffer_size: args.work_buffer_size,
            max_inflight: args.max_inflight,
            max_line_length: args.max_line_length,
            max_sleep: Duration::from_millis(args.max_sleep_ms),
            stall_timeout: (args.stall_timeout_ms > 0)
                .then(|| Duration::from_millis(args.stall_timeout_ms)),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            server_addr: args.server_addr,
            uds: args.uds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let argv = core::iter::once("reseq-server").chain(args.iter().copied());
        let cli = CliArgs::try_parse_from(argv)?;
        ServerConfig::try_from(cli)
    }

    #[test]
    fn explicit_values_are_validated_and_converted() {
        let config = parse(&[
            "--num-workers",
            "8",
            "--max-inflight",
            "32",
            "--stall-timeout-ms",
            "250",
            "--shutdown-timeout",
            "2",
            "--server-addr",
            "127.0.0.1:9000",
        ])
        .unwrap();

        assert_eq!(config.num_workers, 8);
        assert_eq!(config.max_inflight, 32);
        assert_eq!(config.stall_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(2));
        assert_eq!(config.server_addr, "127.0.0.1:9000");

        let coordinator = config.coordinator();
        assert_eq!(coordinator.capacity, 32);
        assert_eq!(coordinator.stall_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn zero_stall_timeout_disables_detection() {
        let config = parse(&["--stall-timeout-ms", "0"]).unwrap();
        assert_eq!(config.stall_timeout, None);
        assert_eq!(config.coordinator().stall_timeout, None);
    }

    #[test]
    fn rejects_zero_workers() {
        let err = parse(&["--num-workers", "0"]).unwrap_err();
        assert!(err.to_string().contains("NUM_WORKERS"));
    }

    #[test]
    fn rejects_zero_inflight() {
        let err = parse(&["--max-inflight", "0"]).unwrap_err();
        assert!(err.to_string().contains("MAX_INFLIGHT"));
    }
}
