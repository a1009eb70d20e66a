use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "scpup",
    version,
    about = "Upload build artifacts to a remote host over scp",
    long_about = "`scpup` uploads local files to a remote host by driving the remote `scp -t` receiver over SSH.

Each RULE has the form SOURCE[=>TARGET]: SOURCE is a file, a directory (uploaded recursively)
or a glob pattern, TARGET is a directory below the remote base path.

EXAMPLE:
    # Upload the web bundle and the build log to /srv/site on web-1
    scpup deploy@web-1:/srv/site 'dist=>public' 'logs/*.log=>logs' --summary"
)]
struct Args {
    // Connection
    /// SSH port
    #[arg(long, default_value = "22", value_name = "PORT", help_heading = "Connection")]
    port: u16,

    /// SSH user name, overrides the user given in TARGET
    #[arg(long, value_name = "USER", help_heading = "Connection")]
    username: Option<String>,

    /// How long to wait for a remote receiver to exit after its input was closed
    ///
    /// This option accepts a human readable duration, e.g. "500ms", "10s", "1min" etc.
    #[arg(
        long,
        default_value = "10s",
        value_name = "DELAY",
        value_parser = humantime::parse_duration,
        help_heading = "Connection"
    )]
    close_timeout: std::time::Duration,

    // Upload options
    /// Permission bits for uploaded files, in octal (default: each file's local permissions)
    #[arg(
        long,
        value_name = "MODE",
        value_parser = parse_mode,
        help_heading = "Upload options"
    )]
    file_mode: Option<u32>,

    /// Permission bits for created directories, in octal
    #[arg(
        long,
        default_value = "0755",
        value_name = "MODE",
        value_parser = parse_mode,
        help_heading = "Upload options"
    )]
    dir_mode: u32,

    /// Size of the buffer file contents are streamed through
    #[arg(
        long,
        default_value = "64KiB",
        value_name = "SIZE",
        help_heading = "Upload options"
    )]
    chunk_size: bytesize::ByteSize,

    // Progress & output
    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        help_heading = "Progress & output"
    )]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    // ARGUMENTS
    /// Remote destination: [user@]host[:path]
    #[arg()]
    target: String,

    /// Artifact rules: SOURCE[=>TARGET]
    #[arg(required = true)]
    rules: Vec<String>,
}

fn parse_mode(value: &str) -> Result<u32, String> {
    let mode = u32::from_str_radix(value, 8)
        .map_err(|error| format!("invalid octal mode {value:?}: {error}"))?;
    if mode > 0o7777 {
        return Err(format!("mode {value} is out of range (max 7777)"));
    }
    Ok(mode)
}

#[instrument]
async fn async_main(args: Args) -> Result<scpup::Summary> {
    let settings = scpup::Settings {
        file_mode: args.file_mode,
        dir_mode: args.dir_mode,
        chunk_size: usize::try_from(args.chunk_size.0)
            .context("chunk size does not fit in memory")?,
    };
    settings.validate()?;
    let target =
        scpup::RemoteTarget::parse(&args.target, args.username.as_deref(), Some(args.port))?;
    let rules = args
        .rules
        .iter()
        .map(|rule| rule.parse::<scpup::ArtifactRule>())
        .collect::<Result<Vec<_>>>()?;
    let groups = scpup::artifacts::collect_all(&rules).await?;
    let shell = std::sync::Arc::new(
        remote::ssh::SshShell::connect(&target.session, args.close_timeout).await?,
    );
    let job = scpup::UploadJob::spawn(shell.clone(), target, groups, settings);
    let ctrl_c = tokio::spawn({
        let cancel = job.cancellation_token();
        async move {
            if scpup::job::watch_interrupts(cancel, tokio::signal::ctrl_c).await {
                tracing::error!("interrupted again, aborting");
                std::process::exit(130);
            }
        }
    });
    let status = job.wait().await;
    ctrl_c.abort();
    match std::sync::Arc::try_unwrap(shell) {
        Ok(shell) => {
            if let Err(error) = shell.disconnect().await {
                tracing::warn!("{:#}", error);
            }
        }
        Err(_) => tracing::debug!("SSH session still referenced, leaving it to drop"),
    }
    match status {
        scpup::JobStatus::Finished(summary) => Ok(summary),
        scpup::JobStatus::Interrupted => Err(anyhow!("upload interrupted")),
        scpup::JobStatus::Failed(message) => Err(anyhow!(message)),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
    };
    let res = common::run(output, runtime, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
