//! The seam between platform code and real subprocesses
//!
//! Platforms hold an `Arc<dyn CommandExecutor>`; tests swap in
//! [`mock::MockExecutor`] to script tool behaviour and inspect invocations.

use super::command::{CommandError, CommandOutput, CommandSpec};
use tokio_util::sync::CancellationToken;

pub trait CommandExecutor: Send + Sync {
    /// Run a command to completion, or until its deadline or cancellation
    fn run(&self, spec: &CommandSpec, cancel: &CancellationToken) -> Result<CommandOutput, CommandError>;
}

/// Spawns real processes through [`run_command`](super::command::run_command)
#[derive(Debug, Clone, Default)]
pub struct RealExecutor;

impl RealExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for RealExecutor {
    fn run(&self, spec: &CommandSpec, cancel: &CancellationToken) -> Result<CommandOutput, CommandError> {
        super::command::run_command(spec, cancel)
    }
}

/// Scripted executor, public so the test crate can drive platforms with it
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Recorded command invocation
    #[derive(Clone, Debug)]
    pub struct CommandCall {
        pub program: String,
        pub args: Vec<String>,
        pub env: Vec<(String, String)>,
        /// Contents of the stdin file at the time of the call
        pub stdin: Option<String>,
    }

    impl CommandCall {
        pub fn has_arg(&self, arg: &str) -> bool {
            self.args.iter().any(|a| a == arg)
        }

        pub fn env_var(&self, key: &str) -> Option<&str> {
            self.env
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        }
    }

    /// Response configuration for mock
    #[derive(Clone, Debug)]
    pub enum MockResponse {
        /// Exit 0; `stdout` goes to the spec's stdout file when one is set
        Success { stdout: String, stderr: String },
        Failure { stderr: String, exit_code: i32 },
        NotFound,
        Timeout,
    }

    impl MockResponse {
        pub fn ok(stdout: &str) -> Self {
            MockResponse::Success {
                stdout: stdout.to_string(),
                stderr: String::new(),
            }
        }

        pub fn fail(stderr: &str) -> Self {
            MockResponse::Failure {
                stderr: stderr.to_string(),
                exit_code: 1,
            }
        }
    }

    impl Default for MockResponse {
        fn default() -> Self {
            MockResponse::ok("")
        }
    }

    #[derive(Default)]
    struct State {
        calls: Vec<CommandCall>,
        /// Keyed by program name
        responses: HashMap<String, MockResponse>,
        fallback: MockResponse,
    }

    /// Answers every program with its scripted [`MockResponse`] (exit 0 with
    /// empty output when none is scripted) and records each call
    #[derive(Clone, Default)]
    pub struct MockExecutor {
        state: Arc<Mutex<State>>,
    }

    impl MockExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn expect(self, program: &str, response: MockResponse) -> Self {
            self.state.lock().responses.insert(program.to_string(), response);
            self
        }

        /// Response for programs without one of their own
        pub fn with_default_response(self, response: MockResponse) -> Self {
            self.state.lock().fallback = response;
            self
        }

        pub fn calls(&self) -> Vec<CommandCall> {
            self.state.lock().calls.clone()
        }

        pub fn was_called(&self, program: &str) -> bool {
            self.call_count(program) > 0
        }

        pub fn call_count(&self, program: &str) -> usize {
            self.state.lock().calls.iter().filter(|c| c.program == program).count()
        }

        pub fn last_call(&self, program: &str) -> Option<CommandCall> {
            self.state
                .lock()
                .calls
                .iter()
                .rev()
                .find(|c| c.program == program)
                .cloned()
        }

        /// Record `spec` and pick its response
        fn answer(&self, spec: &CommandSpec) -> MockResponse {
            let stdin = spec
                .stdin_file
                .as_ref()
                .and_then(|path| std::fs::read_to_string(path).ok());

            let mut state = self.state.lock();
            state.calls.push(CommandCall {
                program: spec.program.clone(),
                args: spec.args.clone(),
                env: spec.env.clone(),
                stdin,
            });
            state
                .responses
                .get(&spec.program)
                .cloned()
                .unwrap_or_else(|| state.fallback.clone())
        }
    }

    impl CommandExecutor for MockExecutor {
        fn run(&self, spec: &CommandSpec, cancel: &CancellationToken) -> Result<CommandOutput, CommandError> {
            if cancel.is_cancelled() {
                return Err(CommandError::Cancelled(spec.program.clone()));
            }

            match self.answer(spec) {
                MockResponse::Success { stdout, stderr } => {
                    let stdout = match spec.stdout_file {
                        Some(ref path) => {
                            std::fs::write(path, &stdout).map_err(|source| CommandError::Io {
                                program: spec.program.clone(),
                                source,
                            })?;
                            String::new()
                        }
                        None => stdout,
                    };
                    Ok(CommandOutput {
                        exit_code: Some(0),
                        success: true,
                        stdout,
                        stderr,
                    })
                }
                MockResponse::Failure { stderr, exit_code } => {
                    // A real tool would have created (and maybe partly filled) the file
                    if let Some(ref path) = spec.stdout_file {
                        let _ = std::fs::write(path, "");
                    }
                    Ok(CommandOutput {
                        exit_code: Some(exit_code),
                        success: false,
                        stdout: String::new(),
                        stderr,
                    })
                }
                MockResponse::NotFound => Err(CommandError::NotFound(spec.program.clone())),
                MockResponse::Timeout => Err(CommandError::TimedOut {
                    program: spec.program.clone(),
                    timeout: spec.timeout.unwrap_or_default(),
                }),
            }
        }
    }
}
