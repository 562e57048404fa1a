//! pwd-port: passwd database queries for an Erlang host.
//!
//! Spawned by the host as an external port program:
//!
//! ```erlang
//! Port = open_port({spawn_executable, "/usr/bin/pwd-port"},
//!                  [{packet, 4}, binary, {args, ["serve"]}]),
//! port_command(Port, <<1, "0">>),
//! receive {Port, {data, Bin}} -> binary_to_term(Bin) end.
//! ```
//!
//! stdout carries the channel, so all logging goes to stderr.

use std::env;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing::{debug, info};

use pwd_port::config::{self, APP_NAME, PortConfig};
use pwd_port::{SystemDirectory, Worker};
use pwd_protocol::command::{GET_PWALL, GET_PWNAM, GET_PWUID};
use pwd_protocol::{Command as Request, PacketReader, PacketSize, PacketWriter, etf};

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{APP_NAME}: {err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common)?;
    ctx.init_logging();
    debug!("resolved config file: {}", ctx.config_file.display());

    match cli.command.unwrap_or_default() {
        Command::Serve(cmd) => handle_serve(&ctx, cmd),
        Command::Query { query } => handle_query(&ctx, query),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Erlang port program answering passwd database queries.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true, env = "PWD_PORT_CONFIG")]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -v)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Emit JSON logs and machine readable `config show` output
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Answer packets on stdin/stdout until the host closes the port
    Serve(ServeCommand),
    /// Run a single command against the system directory and print the reply
    Query {
        #[command(subcommand)]
        query: QueryCommand,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Default for Command {
    fn default() -> Self {
        Command::Serve(ServeCommand::default())
    }
}

#[derive(Debug, Clone, Default, Args)]
struct ServeCommand {
    /// Packet length header width in bytes (1, 2 or 4)
    #[arg(long, value_name = "N")]
    packet: Option<u8>,
    /// Diagnostic log file
    #[arg(long, value_name = "PATH")]
    diagnostic_log: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum QueryCommand {
    /// Look up by numeric uid (parsed like C atoi)
    Uid { uid: String },
    /// Look up by account name
    Name { name: String },
    /// Enumerate every account
    All,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
}

#[derive(Debug)]
struct RuntimeContext {
    common: CommonOpts,
    config_file: PathBuf,
    config: PortConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let config_file = match &common.config {
            Some(path) => {
                let expanded = config::expand_str_path(&path.to_string_lossy())?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => config::default_config_path()?,
        };

        let config = PortConfig::load(&config_file)
            .with_context(|| format!("loading config from {}", config_file.display()))?;

        Ok(Self {
            common,
            config_file,
            config,
        })
    }

    fn init_logging(&self) {
        use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

        let level = self.effective_log_level();
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("pwd_port={level},pwd_protocol={level}"))
        });

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .ok();
        } else {
            let disable_color = env::var_os("NO_COLOR").is_some() || !io::stderr().is_terminal();
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(!disable_color)
                        .with_target(self.common.trace),
                )
                .try_init()
                .ok();
        }
    }

    fn effective_log_level(&self) -> &str {
        if self.common.quiet {
            "off"
        } else if self.common.trace || self.common.verbose >= 2 {
            "trace"
        } else if self.common.debug || self.common.verbose == 1 {
            "debug"
        } else {
            &self.config.logging.level
        }
    }
}

fn handle_serve(ctx: &RuntimeContext, cmd: ServeCommand) -> Result<()> {
    let size = match cmd.packet {
        Some(n) => PacketSize::try_from(n)?,
        None => ctx.config.packet_size()?,
    };
    let log_path = match cmd.diagnostic_log {
        Some(path) => path,
        None => ctx.config.diagnostic_path()?,
    };

    let channel = PacketWriter::new(io::stdout().lock(), size);
    let worker = Worker::start(channel, SystemDirectory::new(), &log_path)
        .context("starting worker")?;
    info!("serving passwd requests ({size:?} packet header)");

    worker.serve(PacketReader::new(io::stdin().lock(), size))?;
    info!("channel closed, worker stopped");
    Ok(())
}

fn handle_query(ctx: &RuntimeContext, query: QueryCommand) -> Result<()> {
    let packet = match &query {
        QueryCommand::Uid { uid } => Request::request(GET_PWUID, uid.as_bytes()),
        QueryCommand::Name { name } => Request::request(GET_PWNAM, name.as_bytes()),
        QueryCommand::All => Request::request(GET_PWALL, &[]),
    };

    let size = ctx.config.packet_size()?;
    let log_path = ctx.config.diagnostic_path()?;
    let mut worker = Worker::start(
        PacketWriter::new(Vec::new(), size),
        SystemDirectory::new(),
        &log_path,
    )
    .context("starting worker")?;
    worker.handle_command(&packet)?;
    let output = worker.stop();

    let mut reader = PacketReader::new(output.as_slice(), size);
    let reply = reader
        .read_packet()?
        .ok_or_else(|| anyhow!("worker produced no reply"))?;
    let term = etf::decode(&reply).context("decoding reply")?;
    println!("{term}");
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                let text = serde_json::to_string_pretty(&ctx.config)
                    .context("serializing config to JSON")?;
                println!("{text}");
            } else {
                let text =
                    toml::to_string_pretty(&ctx.config).context("serializing config to TOML")?;
                print!("{text}");
            }
        }
        ConfigCommand::Path => println!("{}", ctx.config_file.display()),
    }
    Ok(())
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}
