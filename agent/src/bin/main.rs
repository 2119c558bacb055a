use std::{net::SocketAddr, path::Path, sync::Arc, thread, time::Duration};

use anyhow::Context;
use clap::Parser;
use machinestats::{
    console::CoturnClient,
    poll::Poller,
    procfs::ProcfsProvider,
    snapshot::CounterProvider,
    source::{HttpJsonStat, StatSource},
};
use machinestats_agent::{
    config::AgentConfig,
    init_logger,
    server::StatusServer,
    sink::{Sink, StatsdSink, compose_prefix, outbound_ip},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const BINARY: &str = env!("CARGO_BIN_NAME");

/// How many measurements can wait in the channel between the poll loop and the sink.
const CHANNEL_SIZE: usize = 256;

/// Main agent function.
///
/// The steps are:
/// - parse the CLI
/// - parse the config file
/// - apply the settings from CLI and config file
/// - build the sources, the sink and the HTTP server
/// - poll the sources until Ctrl+C
///
/// About errors: we use `anyhow::Result` and `context` instead of `expect` to get
/// nicer error messages (`expect` prints errors with `Debug`).
fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    init_logger(args.common.verbose);
    print_welcome();

    let config_path = Path::new(&args.common.config);
    if let Some(cli::Command::Config(cli::ConfigArgs {
        command: cli::ConfigCommand::Regen,
    })) = &args.command
    {
        // (re)generate the default config
        AgentConfig::default().save(config_path)?;
        log::info!("Default configuration file written to: {}", config_path.display());
        return Ok(());
    }

    let mut config =
        AgentConfig::load(config_path, !args.common.no_default_config).context("could not load config file")?;
    apply_cli_overrides(&args.common, &mut config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("could not create the tokio runtime")?;
    runtime.block_on(run(config))
}

/// Prints a short welcome message.
fn print_welcome() {
    // It is useful to have the precise version of the agent in the logs.
    log::info!("Starting {BINARY} v{}", env!("CARGO_PKG_VERSION"));
}

/// Applies the command-line settings, which take precedence over the config file.
fn apply_cli_overrides(args: &cli::CommonArgs, config: &mut AgentConfig) {
    if let Some(interval) = args.interval {
        config.poll_interval = interval;
    }
    if let Some(path) = &args.procfs {
        config.procfs_path = path.into();
    }
    if let Some(all_cpus) = args.all_cpus {
        config.all_cpus = Some(all_cpus);
    }
    if args.debug {
        config.statsd.enabled = false;
    }
    if let Some(address) = &args.statsd_address {
        config.statsd.address = address.clone();
    }
    if let Some(prefix) = &args.statsd_prefix {
        config.statsd.prefix = prefix.clone();
    }
    if args.prefix_ip {
        config.statsd.prefix_ip = true;
    }
    if let Some(port) = args.server_port {
        config.server.port = port;
    }
    if args.no_server {
        config.server.enabled = false;
    }
    if args.enable_coturn {
        config.coturn.enabled = true;
    }
    if let Some(host) = &args.coturn_host {
        config.coturn.host = host.clone();
    }
    if let Some(port) = args.coturn_port {
        config.coturn.port = port;
    }
    if let Some(password) = &args.coturn_password {
        config.coturn.password = password.clone();
    }
}

/// Builds the sources described by the configuration.
fn build_sources(config: &AgentConfig) -> anyhow::Result<Vec<StatSource>> {
    let provider: Arc<dyn CounterProvider> = Arc::new(ProcfsProvider::new(&config.procfs_path));
    let per_cpu = config.all_cpus.unwrap_or_else(|| {
        let n = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        n > 1
    });

    let mut sources = vec![
        StatSource::connections(provider.clone()),
        StatSource::cpu(provider.clone(), per_cpu),
        StatSource::memory(provider.clone()),
        StatSource::bandwidth(provider),
    ];
    if config.coturn.enabled {
        let address = format!("{}:{}", config.coturn.host, config.coturn.port);
        log::info!("Collecting coturn sessions from {address}");
        let client = CoturnClient::new(address, config.coturn.password.clone()).with_timeout(config.coturn.timeout);
        sources.push(StatSource::coturn(client));
    }
    for http in &config.http {
        let stat = HttpJsonStat::new(&http.name, &http.url, http.prefix.clone(), http.timeout)
            .with_context(|| format!("invalid http source {}", http.name))?;
        sources.push(StatSource::Http(stat));
    }
    Ok(sources)
}

async fn build_sink(config: &AgentConfig) -> anyhow::Result<Sink> {
    if !config.statsd.enabled {
        log::info!("Debug mode: the measurements are logged, not sent");
        return Ok(Sink::Debug);
    }
    let ip = if config.statsd.prefix_ip {
        Some(outbound_ip().await.context("could not determine the ip prefix")?)
    } else {
        None
    };
    let prefix = compose_prefix(&config.statsd.prefix, ip);

    // Retry until the statsd address can be resolved.
    loop {
        match StatsdSink::connect(&config.statsd.address, prefix.clone()).await {
            Ok(sink) => return Ok(Sink::Statsd(sink)),
            Err(e) => {
                log::error!("Failed to set up connection: {e:#}");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn run(config: AgentConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let sources = build_sources(&config)?;
    let sink = build_sink(&config).await?;

    let (tx, rx) = mpsc::channel(CHANNEL_SIZE);
    let poller = Poller::new(sources, config.poll_interval, tx);

    let server = if config.server.enabled {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
        let stop = shutdown.clone();
        let server = StatusServer::bind(addr, poller.subscribe(), async move { stop.cancelled().await })?;
        Some(tokio::spawn(server.run()))
    } else {
        None
    };

    let sink_task = tokio::spawn(sink.run(rx));
    let mut poll_task = tokio::spawn(poller.run(shutdown.clone()));

    let finished = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for Ctrl+C")?;
            log::info!("Received Ctrl+C, stopping...");
            None
        }
        res = &mut poll_task => Some(res),
    };
    shutdown.cancel();
    let poll_result = match finished {
        Some(res) => res,
        None => poll_task.await,
    };
    poll_result.context("poll loop panicked")??;
    // the poller has dropped the sender, the sink stops after the last measurement
    sink_task.await.context("sink panicked")?;
    if let Some(server) = server {
        server.await.context("http server panicked")??;
    }
    log::info!("{BINARY} stopped");
    Ok(())
}

/// Agent command-line interface (CLI).
///
/// Every option can also be set with an environment variable.
/// Options given on the command line take precedence over the config file.
mod cli {
    use clap::{Args, Parser, Subcommand};
    use std::time::Duration;

    // NOTE: the doc comment attached to `Cli` is used by clap as the description of
    // the application. It is displayed at the start of the help message.

    /// machinestatsd: send machine statistics to statsd.
    #[derive(Parser)]
    #[command(version)]
    pub struct Cli {
        #[command(subcommand)]
        pub command: Option<Command>,

        #[command(flatten)]
        pub common: CommonArgs,
    }

    #[derive(Subcommand)]
    pub enum Command {
        /// Run the agent and monitor the system.
        ///
        /// This is the default command.
        Run,

        /// Manipulate the configuration.
        Config(ConfigArgs),
    }

    #[derive(Args)]
    pub struct ConfigArgs {
        #[command(subcommand)]
        pub command: ConfigCommand,
    }

    #[derive(Subcommand)]
    pub enum ConfigCommand {
        /// Regenerate the configuration file and stop.
        ///
        /// If the file exists, it will be overwritten.
        Regen,
    }

    /// Common CLI arguments.
    #[derive(Args, Clone)]
    pub struct CommonArgs {
        /// Path to the config file.
        #[arg(long, env = "MACHINESTATSD_CONFIG", default_value = "machinestatsd.toml")]
        pub config: String,

        /// If set, the config file must exist, otherwise the agent will fail to start with an error.
        #[arg(long, default_value_t = false)]
        pub no_default_config: bool,

        /// Debug mode: log the stats instead of sending them to statsd.
        #[arg(short = 'D', long, env = "MACHINESTATSD_DEBUG")]
        pub debug: bool,

        /// Verbose logs.
        #[arg(short, long, env = "MACHINESTATSD_VERBOSE")]
        pub verbose: bool,

        /// Report the load of each CPU.
        #[arg(short = 'C', long, env = "MACHINESTATSD_ALL_CPUS")]
        pub all_cpus: Option<bool>,

        /// Address of the statsd server.
        #[arg(short = 'a', long, env = "STATSD_ADDRESS")]
        pub statsd_address: Option<String>,

        /// Interval at which the stats are collected.
        ///
        /// A plain number is a number of milliseconds, ex. `3000`. Units can be given, ex. `3s`.
        #[arg(short = 'd', long = "statsd-interval", env = "STATSD_INTERVAL", value_parser = parse_interval)]
        pub interval: Option<Duration>,

        /// Prefix of every metric name.
        #[arg(short = 'p', long, env = "STATSD_PREFIX")]
        pub statsd_prefix: Option<String>,

        /// Add the outbound IP address of the machine to the prefix.
        #[arg(long, env = "MACHINESTATSD_PREFIX_IP")]
        pub prefix_ip: bool,

        /// Path to the procfs mount.
        #[arg(long, env = "MACHINESTATSD_PROCFS_PATH")]
        pub procfs: Option<String>,

        /// Port of the HTTP server.
        #[arg(long, env = "MACHINESTATSD_SERVER_PORT")]
        pub server_port: Option<u16>,

        /// Disable the HTTP server.
        #[arg(long)]
        pub no_server: bool,

        /// Collect the number of sessions of a coturn server.
        #[arg(long, env = "MACHINESTATSD_COTURN_ENABLE")]
        pub enable_coturn: bool,

        /// Host of the coturn server.
        #[arg(long, env = "MACHINESTATSD_COTURN_HOST")]
        pub coturn_host: Option<String>,

        /// Port of the coturn CLI.
        #[arg(long, env = "MACHINESTATSD_COTURN_PORT")]
        pub coturn_port: Option<u16>,

        /// Password of the coturn CLI.
        #[arg(long, env = "MACHINESTATSD_COTURN_PASSWORD", hide_env_values = true)]
        pub coturn_password: Option<String>,
    }

    fn parse_interval(s: &str) -> Result<Duration, String> {
        if let Ok(millis) = s.parse::<u64>() {
            return Ok(Duration::from_millis(millis));
        }
        humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
    }

}
