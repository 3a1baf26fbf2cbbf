//! Interactive control loop over a line-oriented console.

use std::io::{self, BufRead, Write};

use thiserror::Error;

use ferry_config::ServerConfig;
use ferry_edge::LoadBalancer;

pub const PROMPT: &str = "ferry> ";

const HELP: &str = "\
commands:
  help                 show this text
  start                start accepting clients
  stop                 stop accepting and drop every session
  servers              list attached backends
  add <ip> <port>      attach a backend
  remove <ip> <port>   detach a backend
  exit | quit          stop and leave";

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Start,
    Stop,
    Servers,
    Add(ServerConfig),
    Remove(ServerConfig),
    Exit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command '{0}', type 'help' for the list")]
    Unknown(String),

    #[error("'{0}' takes no arguments")]
    UnexpectedArguments(String),

    #[error("usage: {0} <ip> <port>")]
    Usage(String),

    #[error("invalid IPv4 address '{0}'")]
    InvalidAddress(String),

    #[error("invalid port '{0}'")]
    InvalidPort(String),
}

pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default().to_lowercase();
    let args: Vec<&str> = words.collect();

    let command = match verb.as_str() {
        "help" => Command::Help,
        "start" => Command::Start,
        "stop" => Command::Stop,
        "servers" => Command::Servers,
        "exit" | "quit" => Command::Exit,
        "add" | "remove" => {
            let [address, port] = args.as_slice() else {
                return Err(CommandError::Usage(verb));
            };
            let server = parse_server(address, port)?;
            return Ok(if verb == "add" {
                Command::Add(server)
            } else {
                Command::Remove(server)
            });
        }
        _ => return Err(CommandError::Unknown(verb)),
    };

    if !args.is_empty() {
        return Err(CommandError::UnexpectedArguments(verb));
    }
    Ok(command)
}

fn parse_server(address: &str, port: &str) -> Result<ServerConfig, CommandError> {
    let port = port
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| CommandError::InvalidPort(port.to_string()))?;

    ServerConfig::new(address, port).map_err(|_| CommandError::InvalidAddress(address.to_string()))
}

/// Reads commands until `exit` or end of input. Command failures are
/// printed and the loop continues; only console I/O errors end it.
pub fn run<R: BufRead, W: Write>(balancer: &LoadBalancer, mut input: R, mut output: W) -> io::Result<()> {
    writeln!(output, "type 'help' for commands")?;

    loop {
        write!(output, "{PROMPT}")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Ok(Command::Exit) => return Ok(()),
            Ok(command) => execute(balancer, command, &mut output)?,
            Err(err) => writeln!(output, "{err}")?,
        }
    }
}

fn execute<W: Write>(balancer: &LoadBalancer, command: Command, output: &mut W) -> io::Result<()> {
    match command {
        Command::Help => writeln!(output, "{HELP}"),
        Command::Start => match balancer.start_work() {
            Ok(()) => match balancer.local_addr() {
                Some(addr) => writeln!(output, "started on {addr}"),
                None => writeln!(output, "started"),
            },
            Err(err) => writeln!(output, "{err}"),
        },
        Command::Stop => match balancer.stop_work() {
            Ok(()) => writeln!(output, "stopped"),
            Err(err) => writeln!(output, "{err}"),
        },
        Command::Servers => {
            let servers = balancer.servers();
            if servers.is_empty() {
                return writeln!(output, "no backends attached");
            }
            for server in servers {
                match balancer.active_connections(&server) {
                    Some(active) => writeln!(output, "{server} ({active} active)")?,
                    None => writeln!(output, "{server}")?,
                }
            }
            Ok(())
        }
        Command::Add(server) => {
            if balancer.attach_server(server.clone()) {
                writeln!(output, "attached {server}")
            } else {
                writeln!(output, "{server} is already attached")
            }
        }
        Command::Remove(server) => {
            if balancer.detach_server(&server) {
                writeln!(output, "detached {server}")
            } else {
                writeln!(output, "{server} is not attached")
            }
        }
        Command::Exit => Ok(()),
    }
}
