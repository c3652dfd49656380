//! Arguments de la ligne de commande

use std::net::IpAddr;
use std::path::PathBuf;

pub const USAGE: &str = "\
Usage: pmoradio --playlist <file.m3u> [options]

Options:
  -p, --playlist <file>   M3U playlist to broadcast (or radio.playlist in config)
  -P, --port <port>       HTTP listen port (host.http_port)
  -b, --bind <addr>       HTTP listen address (host.bind_address)
  -c, --config <dir>      Configuration directory
      --icy-port <port>   Also serve a raw ICY socket on this port
  -h, --help              Print this help";

/// Valeurs passées en ligne de commande ; elles priment sur la configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    pub playlist: Option<PathBuf>,
    pub port: Option<u16>,
    pub bind: Option<IpAddr>,
    pub config_dir: Option<String>,
    pub icy_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(CliArgs),
    Help,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CliError {
    #[error("missing value for {0}")]
    MissingValue(String),

    #[error("invalid value '{value}' for {flag}")]
    InvalidValue { flag: String, value: String },

    #[error("unknown argument '{0}'")]
    UnknownArgument(String),
}

fn value<I>(flag: &str, args: &mut I) -> Result<String, CliError>
where
    I: Iterator<Item = String>,
{
    match args.next() {
        Some(v) if !v.starts_with('-') || v == "-" => Ok(v),
        _ => Err(CliError::MissingValue(flag.to_string())),
    }
}

fn parsed<T: std::str::FromStr>(flag: &str, raw: String) -> Result<T, CliError> {
    raw.parse().map_err(|_| CliError::InvalidValue {
        flag: flag.to_string(),
        value: raw,
    })
}

/// Analyse les arguments (sans le nom du programme)
///
/// Accepte aussi la forme `--flag=value`.
pub fn parse<I>(args: I) -> Result<Command, CliError>
where
    I: IntoIterator<Item = String>,
{
    let mut cli = CliArgs::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
            _ => (arg.clone(), None),
        };
        match flag.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "-p" | "--playlist" => {
                cli.playlist = Some(PathBuf::from(next_value(&flag, &inline, &mut args)?))
            }
            "-P" | "--port" => {
                cli.port = Some(parsed(&flag, next_value(&flag, &inline, &mut args)?)?)
            }
            "-b" | "--bind" => {
                cli.bind = Some(parsed(&flag, next_value(&flag, &inline, &mut args)?)?)
            }
            "-c" | "--config" => cli.config_dir = Some(next_value(&flag, &inline, &mut args)?),
            "--icy-port" => {
                cli.icy_port = Some(parsed(&flag, next_value(&flag, &inline, &mut args)?)?)
            }
            _ => return Err(CliError::UnknownArgument(arg)),
        }
    }

    Ok(Command::Run(cli))
}

fn next_value<I>(flag: &str, inline: &Option<String>, args: &mut I) -> Result<String, CliError>
where
    I: Iterator<Item = String>,
{
    match inline {
        Some(v) if !v.is_empty() => Ok(v.clone()),
        Some(_) => Err(CliError::MissingValue(flag.to_string())),
        None => value(flag, args),
    }
}
