//! Duolock client side executable.

use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;

use tokio::runtime::Builder;

use duolock::{logger_init, pf_error, pf_warn, Clerk, DuolockError, ME};

mod clients;

use crate::clients::{ClientMode, ClientRepl, ClientTester};

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Primary server address 'ip:port'.
    #[arg(short, long)]
    primary: SocketAddr,

    /// Backup server address 'ip:port'.
    #[arg(short, long)]
    backup: SocketAddr,

    /// Client utility mode to run: repl|tester.
    #[arg(short, long, default_value_t = String::from("repl"))]
    utility: String,

    /// Clerk configuration TOML string.
    /// Every '+' is treated as newline.
    #[arg(long, default_value_t = String::from(""))]
    config: String,

    /// Mode-specific client parameters TOML string.
    /// Every '+' is treated as newline.
    #[arg(long, default_value_t = String::from(""))]
    params: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 2)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(mode)` on success or
    /// `Err(DuolockError)` on any error.
    fn sanitize(&self) -> Result<ClientMode, DuolockError> {
        if self.primary == self.backup {
            Err(DuolockError::msg(format!(
                "primary == backup {}",
                self.primary
            )))
        } else if self.threads < 2 {
            Err(DuolockError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )))
        } else {
            ClientMode::parse_name(&self.utility).ok_or(DuolockError::msg(
                format!("utility mode '{}' unrecognized", self.utility),
            ))
        }
    }
}

/// Replaces every '+' with a newline; `None` if the string is empty.
fn toml_arg(arg: &str) -> Option<String> {
    if arg.is_empty() {
        None
    } else {
        Some(arg.replace('+', "\n"))
    }
}

/// Actual main function of Duolock client executable.
fn client_main() -> Result<(), DuolockError> {
    // read in and parse command line arguments
    let args = CliArgs::parse();
    let mode = args.sanitize()?;

    let config_str = toml_arg(&args.config);
    let params_str = toml_arg(&args.params);

    // create tokio multi-threaded runtime
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(args.threads)
        .thread_name("tokio-worker-client")
        .build()?;

    // enter tokio runtime and do work
    runtime.block_on(async move {
        match mode {
            ClientMode::Repl => {
                // run interactive REPL loop
                let clerk = Clerk::new(
                    args.primary,
                    args.backup,
                    config_str.as_deref(),
                )?;
                let _ = ME.set(format!("c{}", clerk.id()));
                let mut repl = ClientRepl::new(clerk);
                repl.run().await?;
            }
            ClientMode::Tester => {
                // run correctness testing client
                let mut tester = ClientTester::new(
                    args.primary,
                    args.backup,
                    config_str.as_deref(),
                    params_str.as_deref(),
                )?;
                tester.run().await?;
            }
        }

        Ok::<(), DuolockError>(()) // give type hint for this async closure
    })
}

/// Main function of Duolock client executable.
fn main() -> ExitCode {
    logger_init();

    if let Err(ref e) = client_main() {
        pf_error!("client_main exitted: {}", e);
        ExitCode::FAILURE
    } else {
        pf_warn!("client_main exitted successfully");
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod arg_tests {
    use super::*;

    #[test]
    fn sanitize_valid() -> Result<(), DuolockError> {
        let args = CliArgs {
            primary: "127.0.0.1:52700".parse()?,
            backup: "127.0.0.1:52701".parse()?,
            utility: "repl".into(),
            config: String::new(),
            params: String::new(),
            threads: 2,
        };
        assert_eq!(args.sanitize(), Ok(ClientMode::Repl));
        Ok(())
    }

    #[test]
    fn sanitize_invalid_utility() -> Result<(), DuolockError> {
        let args = CliArgs {
            primary: "127.0.0.1:52700".parse()?,
            backup: "127.0.0.1:52701".parse()?,
            utility: "invalid_mode".into(),
            config: String::new(),
            params: String::new(),
            threads: 2,
        };
        assert_eq!(
            args.sanitize(),
            Err(DuolockError::msg("utility mode 'invalid_mode' unrecognized"))
        );
        Ok(())
    }

    #[test]
    fn sanitize_same_addrs() -> Result<(), DuolockError> {
        let args = CliArgs {
            primary: "127.0.0.1:52700".parse()?,
            backup: "127.0.0.1:52700".parse()?,
            utility: "tester".into(),
            config: String::new(),
            params: String::new(),
            threads: 2,
        };
        assert!(args.sanitize().is_err());
        Ok(())
    }

    #[test]
    fn toml_arg_newlines() {
        assert_eq!(toml_arg(""), None);
        assert_eq!(
            toml_arg("a = 1+b = 2"),
            Some(String::from("a = 1\nb = 2"))
        );
    }
}
