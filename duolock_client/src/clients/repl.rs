//! Interactive REPL-style command-line interface client.

use std::io::{self, Write};
use std::str::SplitWhitespace;

use color_print::{cprint, cprintln};

use tokio::time::Instant;

use duolock::{Clerk, DuolockError};

/// Prompt string at the start of line.
const PROMPT: &str = ">>>>> ";

/// Recognizable command types.
#[derive(Debug, PartialEq, Eq)]
enum ReplCommand {
    /// Acquire a named lock.
    Lock(String),

    /// Release a named lock.
    Unlock(String),

    /// Print help message.
    PrintHelp,

    /// Client exit.
    Exit,

    /// Nothing read.
    Nothing,
}

/// Interactive REPL-style client struct.
pub struct ClientRepl {
    /// Lock service clerk.
    clerk: Clerk,

    /// User input buffer.
    input_buf: String,
}

impl ClientRepl {
    /// Creates a new REPL-style client.
    pub fn new(clerk: Clerk) -> Self {
        ClientRepl {
            clerk,
            input_buf: String::new(),
        }
    }

    /// Prints the prompt string.
    #[inline]
    fn print_prompt() -> Result<(), DuolockError> {
        cprint!("<bright-yellow>{}</>", PROMPT);
        io::stdout().flush()?;
        Ok(())
    }

    /// Prints (optionally) an error message and the help message.
    fn print_help(err: Option<&DuolockError>) {
        if let Some(e) = err {
            cprintln!("<bright-red>✗</> {}", e);
        }
        println!("HELP: Supported commands are:");
        println!("          lock <name>");
        println!("          unlock <name>");
        println!("          help");
        println!("          exit");
        println!("      Lock names currently cannot contain any whitespaces");
    }

    /// Expect to get the next segment string from parsed segs.
    #[inline]
    fn expect_next_seg<'s>(
        segs: &mut SplitWhitespace<'s>,
    ) -> Result<&'s str, DuolockError> {
        if let Some(seg) = segs.next() {
            Ok(seg)
        } else {
            let err = DuolockError::msg("not enough args");
            Self::print_help(Some(&err));
            Err(err)
        }
    }

    /// Parses one input line into a command.
    fn parse_command(line: &str) -> Result<ReplCommand, DuolockError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(ReplCommand::Nothing);
        }

        // split input line by whitespaces, getting an iterator of segments
        let mut segs = line.split_whitespace();
        let cmd_type = Self::expect_next_seg(&mut segs)?;

        // get command type, match case-insensitively; lock names are kept
        // as-is
        match &cmd_type.to_lowercase()[..] {
            "lock" => {
                let name = Self::expect_next_seg(&mut segs)?;
                Ok(ReplCommand::Lock(name.into()))
            }

            "unlock" => {
                let name = Self::expect_next_seg(&mut segs)?;
                Ok(ReplCommand::Unlock(name.into()))
            }

            "help" => Ok(ReplCommand::PrintHelp),

            "exit" => Ok(ReplCommand::Exit),

            _ => {
                let err = DuolockError(format!(
                    "unrecognized command: {}",
                    cmd_type
                ));
                Self::print_help(Some(&err));
                Err(err)
            }
        }
    }

    /// Reads in user input and parses into a command.
    fn read_command(&mut self) -> Result<ReplCommand, DuolockError> {
        self.input_buf.clear();
        let nread = io::stdin().read_line(&mut self.input_buf)?;
        if nread == 0 {
            return Ok(ReplCommand::Exit);
        }
        Self::parse_command(&self.input_buf)
    }

    /// Issues a lock/unlock call and prints its outcome.
    async fn eval_call(&mut self, name: &str, lock: bool) {
        let start = Instant::now();
        let result = if lock {
            self.clerk.lock(name).await
        } else {
            self.clerk.unlock(name).await
        };
        let lat_ms = start.elapsed().as_secs_f64() * 1000.0;
        let op = if lock { "lock" } else { "unlock" };

        match result {
            Ok(true) => {
                cprintln!(
                    "<bright-green>✓</> {} {} <<took {:.2} ms>>",
                    op,
                    name,
                    lat_ms
                );
            }
            Ok(false) => {
                cprintln!(
                    "<bright-red>✗</> {} {} refused <<took {:.2} ms>>",
                    op,
                    name,
                    lat_ms
                );
            }
            Err(e) => {
                cprintln!("<bright-red>✗</> service unreachable: {}", e);
            }
        }
        if self.clerk.failed_over() {
            cprintln!("<bright-cyan>#</> talking to backup");
        }
    }

    /// One iteration of the REPL loop.
    async fn iter(&mut self) -> Result<bool, DuolockError> {
        Self::print_prompt()?;

        let cmd = self.read_command()?;
        match cmd {
            ReplCommand::Exit => {
                println!("Exitting...");
                Ok(false)
            }

            ReplCommand::Nothing => Ok(true),

            ReplCommand::PrintHelp => {
                Self::print_help(None);
                Ok(true)
            }

            ReplCommand::Lock(name) => {
                self.eval_call(&name, true).await;
                Ok(true)
            }

            ReplCommand::Unlock(name) => {
                self.eval_call(&name, false).await;
                Ok(true)
            }
        }
    }

    /// Runs the infinite REPL loop.
    pub async fn run(&mut self) -> Result<(), DuolockError> {
        loop {
            if let Ok(false) = self.iter().await {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod repl_tests {
    use super::*;

    #[test]
    fn parse_valid() -> Result<(), DuolockError> {
        assert_eq!(
            ClientRepl::parse_command("lock printer\n")?,
            ReplCommand::Lock("printer".into())
        );
        assert_eq!(
            ClientRepl::parse_command("  UNLOCK Printer ")?,
            ReplCommand::Unlock("Printer".into())
        );
        assert_eq!(ClientRepl::parse_command("help")?, ReplCommand::PrintHelp);
        assert_eq!(ClientRepl::parse_command("exit")?, ReplCommand::Exit);
        assert_eq!(ClientRepl::parse_command("   ")?, ReplCommand::Nothing);
        Ok(())
    }

    #[test]
    fn parse_invalid() {
        assert!(ClientRepl::parse_command("lock").is_err());
        assert!(ClientRepl::parse_command("grab A").is_err());
    }
}
