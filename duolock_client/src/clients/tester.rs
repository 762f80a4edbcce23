//! Correctness testing client driving a live primary/backup pair.

use std::net::SocketAddr;

use serde::Deserialize;

use duolock::{
    logged_err, parsed_config, pf_error, pf_info, Clerk, DuolockError,
};

/// List of all tests.
const ALL_TESTS: [&str; 3] = ["basic_scenario", "unlock_unheld", "two_locks"];

/// Mode parameters struct.
#[derive(Debug, Deserialize)]
pub struct ModeParamsTester {
    /// Name of individual test to run, or 'all' to run all tests.
    pub test_name: String,

    /// Whether to continue next test upon failed test.
    pub keep_going: bool,
}

#[allow(clippy::derivable_impls)]
impl Default for ModeParamsTester {
    fn default() -> Self {
        ModeParamsTester {
            test_name: "all".into(),
            keep_going: false,
        }
    }
}

/// Correctness testing client struct.
pub struct ClientTester {
    /// Primary server address.
    primary: SocketAddr,

    /// Backup server address.
    backup: SocketAddr,

    /// Clerk configuration TOML string.
    config_str: Option<String>,

    /// Mode parameters struct.
    params: ModeParamsTester,
}

impl ClientTester {
    /// Creates a new testing client.
    pub fn new(
        primary: SocketAddr,
        backup: SocketAddr,
        config_str: Option<&str>,
        params_str: Option<&str>,
    ) -> Result<Self, DuolockError> {
        let params = parsed_config!(params_str => ModeParamsTester;
                                    test_name, keep_going)?;
        if params.test_name != "all"
            && !ALL_TESTS.contains(&params.test_name.as_str())
        {
            return logged_err!(
                "unrecognized test name '{}'",
                params.test_name
            );
        }

        Ok(ClientTester {
            primary,
            backup,
            config_str: config_str.map(String::from),
            params,
        })
    }

    /// Creates a fresh clerk with its own caller ID.
    fn new_clerk(&self) -> Result<Clerk, DuolockError> {
        Clerk::new(self.primary, self.backup, self.config_str.as_deref())
    }

    /// Runs the specified test(s).
    pub async fn run(&mut self) -> Result<(), DuolockError> {
        let tests: Vec<&str> = if self.params.test_name == "all" {
            ALL_TESTS.to_vec()
        } else {
            vec![self.params.test_name.as_str()]
        };

        let mut all_pass = true;
        for name in tests {
            let result = self.do_test_by_name(name).await;
            match result {
                Ok(()) => pf_info!("test {} ... PASSED", name),
                Err(ref e) => {
                    pf_error!("test {} ... FAILED: {}", name, e);
                    all_pass = false;
                    if !self.params.keep_going {
                        return result;
                    }
                }
            }
        }

        if all_pass {
            Ok(())
        } else {
            logged_err!("some tests failed")
        }
    }

    async fn do_test_by_name(&self, name: &str) -> Result<(), DuolockError> {
        match name {
            "basic_scenario" => self.test_basic_scenario().await,
            "unlock_unheld" => self.test_unlock_unheld().await,
            "two_locks" => self.test_two_locks().await,
            _ => logged_err!("unrecognized test name '{}'", name),
        }
    }

    /// Checks a call's outcome against the expected one.
    fn expect(
        what: &str,
        got: bool,
        expected: bool,
    ) -> Result<(), DuolockError> {
        if got != expected {
            logged_err!("{}: expected {} got {}", what, expected, got)
        } else {
            Ok(())
        }
    }

    /// Two clerks contend on one lock, handing it over.
    async fn test_basic_scenario(&self) -> Result<(), DuolockError> {
        let mut ca = self.new_clerk()?;
        let mut cb = self.new_clerk()?;
        let lock = format!("scenario-{}", ca.id());
        Self::expect("a lock", ca.lock(&lock).await?, true)?;
        Self::expect("b lock", cb.lock(&lock).await?, false)?;
        Self::expect("a unlock", ca.unlock(&lock).await?, true)?;
        Self::expect("b lock again", cb.lock(&lock).await?, true)?;
        Self::expect("b unlock", cb.unlock(&lock).await?, true)?;
        Ok(())
    }

    /// Unlocking a never-locked name is refused.
    async fn test_unlock_unheld(&self) -> Result<(), DuolockError> {
        let mut ca = self.new_clerk()?;
        let lock = format!("unheld-{}", ca.id());
        Self::expect("a unlock", ca.unlock(&lock).await?, false)?;
        Ok(())
    }

    /// Different lock names do not interfere.
    async fn test_two_locks(&self) -> Result<(), DuolockError> {
        let mut ca = self.new_clerk()?;
        let mut cb = self.new_clerk()?;
        let lock_x = format!("x-{}", ca.id());
        let lock_y = format!("y-{}", ca.id());
        Self::expect("a lock x", ca.lock(&lock_x).await?, true)?;
        Self::expect("b lock y", cb.lock(&lock_y).await?, true)?;
        Self::expect("a lock y", ca.lock(&lock_y).await?, false)?;
        Self::expect("b lock x", cb.lock(&lock_x).await?, false)?;
        Self::expect("a unlock x", ca.unlock(&lock_x).await?, true)?;
        Self::expect("b unlock y", cb.unlock(&lock_y).await?, true)?;
        Ok(())
    }
}
