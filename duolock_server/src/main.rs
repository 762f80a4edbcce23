//! Duolock lock server executable.

use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;

use log::{self, LevelFilter};

use tokio::runtime::Builder;
use tokio::sync::watch;

use duolock::{
    logger_init, pf_error, pf_warn, DuolockError, LockReplica, ServerRole, ME,
};

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

    /// Run as the primary; otherwise run as the backup.
    #[arg(long, default_value_t = false)]
    am_primary: bool,

    /// Server configuration TOML string.
    /// Every '+' is treated as newline.
    #[arg(long, default_value_t = String::from(""))]
    config: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 4)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(())` on success or
    /// `Err(DuolockError)` on any error.
    fn sanitize(&self) -> Result<(), DuolockError> {
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
            Ok(())
        }
    }
}

/// Actual main function of Duolock server executable.
fn server_main() -> Result<(), DuolockError> {
    // read in and parse command line arguments
    let mut args = CliArgs::parse();
    args.sanitize()?;
    let role = if args.am_primary {
        ServerRole::Primary
    } else {
        ServerRole::Secondary
    };
    let _ = ME.set(role.tag().into());

    // parse optional config string if given
    let config_str = if args.config.is_empty() {
        None
    } else {
        args.config = args.config.replace('+', "\n");
        Some(args.config.clone())
    };

    // set up termination signals handler
    let (tx_term, rx_term) = watch::channel(false);
    ctrlc::set_handler(move || {
        if let Err(e) = tx_term.send(true) {
            pf_error!("error sending to term channel: {}", e);
        }
    })?;

    let log_level = log::max_level();
    {
        // create tokio multi-threaded runtime
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(args.threads)
            .thread_name("tokio-worker-server")
            .build()?;

        // enter tokio runtime, start the lock server, and serve until
        // terminated
        runtime.block_on(async move {
            let mut replica = LockReplica::new_and_setup(
                args.primary,
                args.backup,
                args.am_primary,
                config_str.as_deref(),
            )
            .await?;

            replica.run(rx_term).await?;

            // suppress logging before dropping the runtime to avoid spurious
            // error messages
            log::set_max_level(LevelFilter::Off);

            Ok::<(), DuolockError>(()) // give type hint for this async closure
        })?;
    } // drop the runtime here

    log::set_max_level(log_level);
    Ok(())
}

/// Main function of Duolock server executable.
fn main() -> ExitCode {
    logger_init();

    if let Err(ref e) = server_main() {
        pf_error!("server_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        pf_warn!("server_main exited successfully");
        ExitCode::SUCCESS
    }
}
