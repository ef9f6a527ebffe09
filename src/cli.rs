// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::wire::FileKind;

/// Command-line arguments for `suitelink`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "suitelink",
    version,
    about = "Talk to workflow servers: run commands, fetch files, follow state changes.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Suitelink.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Suitelink.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SUITELINK_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run a command (or a named command from `[commands]`) on one server.
    Run(RunArgs),

    /// Follow one or all servers and log every change until Ctrl-C.
    Watch {
        /// Only this server. Default: every configured server.
        #[arg(long, value_name = "NAME")]
        server: Option<String>,
    },

    /// Print the server's suite list.
    Suites {
        #[arg(long, value_name = "NAME")]
        server: String,
    },

    /// Fetch a node's script, job, job output or manual.
    File {
        #[arg(long, value_name = "NAME")]
        server: String,

        /// Absolute node path, e.g. `/s1/f1/t1`.
        #[arg(long, value_name = "PATH")]
        node: String,

        #[arg(long, value_enum, default_value = "script")]
        kind: FileKindArg,
    },

    /// Validate the config and print what it defines. No network access.
    Check,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[arg(long, value_name = "NAME")]
    pub server: String,

    /// Node path substituted for `<full_name>` / `<node_name>`.
    #[arg(long, value_name = "PATH")]
    pub node: Option<String>,

    /// Command tokens, or a single `[commands]` name.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub tokens: Vec<String>,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum FileKindArg {
    Script,
    Job,
    Jobout,
    Manual,
}

impl From<FileKindArg> for FileKind {
    fn from(arg: FileKindArg) -> Self {
        match arg {
            FileKindArg::Script => FileKind::Script,
            FileKindArg::Job => FileKind::Job,
            FileKindArg::Jobout => FileKind::Jobout,
            FileKindArg::Manual => FileKind::Manual,
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
