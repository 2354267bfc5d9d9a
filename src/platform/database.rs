use crate::config::{DatabaseConfig, DatabaseEngine};
use crate::error::SnapshotError;
use crate::locator::DatabaseConnection;
use crate::utils::command::{CommandError, CommandOutput, CommandSpec};
use std::path::Path;
use std::time::Duration;

/// Program names of the dump/load tools on one OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseTools {
    pub mysql_dump: &'static str,
    pub mysql_load: &'static str,
    pub postgres_dump: &'static str,
    pub postgres_dump_all: &'static str,
    pub postgres_load: &'static str,
}

impl DatabaseTools {
    pub const UNIX: DatabaseTools = DatabaseTools {
        mysql_dump: "mysqldump",
        mysql_load: "mysql",
        postgres_dump: "pg_dump",
        postgres_dump_all: "pg_dumpall",
        postgres_load: "psql",
    };

    pub const WINDOWS: DatabaseTools = DatabaseTools {
        mysql_dump: "mysqldump.exe",
        mysql_load: "mysql.exe",
        postgres_dump: "pg_dump.exe",
        postgres_dump_all: "pg_dumpall.exe",
        postgres_load: "psql.exe",
    };

    /// Tools of the running OS
    pub fn native() -> &'static DatabaseTools {
        if cfg!(windows) {
            &Self::WINDOWS
        } else {
            &Self::UNIX
        }
    }

    /// Every program a configured connection may invoke, overrides included
    pub fn programs(&self, db: &DatabaseConfig) -> Vec<String> {
        let (dump, load) = match db.engine {
            DatabaseEngine::Mysql => (vec![self.mysql_dump], self.mysql_load),
            DatabaseEngine::Postgres => (vec![self.postgres_dump, self.postgres_dump_all], self.postgres_load),
        };

        let mut programs: Vec<String> = match db.dump_program {
            Some(ref program) => vec![program.clone()],
            None => dump.into_iter().map(str::to_string).collect(),
        };
        programs.push(db.load_program.clone().unwrap_or_else(|| load.to_string()));
        programs
    }

    /// Dump command writing to `artifact` through stdout
    pub fn dump_spec(&self, conn: &DatabaseConnection, artifact: &Path, timeout: Option<Duration>) -> CommandSpec {
        let spec = match conn.engine {
            DatabaseEngine::Mysql => {
                let program = conn.dump_program.as_deref().unwrap_or(self.mysql_dump);
                let spec = mysql_base(program, conn).args([
                    "--single-transaction",
                    "--routines",
                    "--triggers",
                ]);
                match conn.database {
                    Some(ref db) => spec.arg("--databases").arg(db),
                    None => spec.arg("--all-databases"),
                }
            }
            DatabaseEngine::Postgres => match conn.database {
                Some(ref db) => {
                    let program = conn.dump_program.as_deref().unwrap_or(self.postgres_dump);
                    postgres_base(program, conn)
                        .args(["--clean", "--if-exists", "--dbname"])
                        .arg(db)
                }
                None => {
                    let program = conn.dump_program.as_deref().unwrap_or(self.postgres_dump_all);
                    postgres_base(program, conn).args(["--clean", "--if-exists"])
                }
            },
        };

        spec.stdout_file(artifact).timeout(timeout)
    }

    /// Load command reading `artifact` from stdin
    pub fn load_spec(&self, conn: &DatabaseConnection, artifact: &Path, timeout: Option<Duration>) -> CommandSpec {
        let spec = match conn.engine {
            // The dump carries its own CREATE DATABASE / USE statements
            DatabaseEngine::Mysql => {
                let program = conn.load_program.as_deref().unwrap_or(self.mysql_load);
                mysql_base(program, conn)
            }
            DatabaseEngine::Postgres => {
                let program = conn.load_program.as_deref().unwrap_or(self.postgres_load);
                postgres_base(program, conn)
                    .args(["--set", "ON_ERROR_STOP=1", "--dbname"])
                    .arg(conn.database.as_deref().unwrap_or("postgres"))
            }
        };

        spec.stdin_file(artifact).timeout(timeout)
    }
}

fn mysql_base(program: &str, conn: &DatabaseConnection) -> CommandSpec {
    let spec = CommandSpec::new(program)
        .arg("--host")
        .arg(&conn.host)
        .arg("--port")
        .arg(conn.port.to_string())
        .arg("--user")
        .arg(&conn.user);

    match conn.password {
        Some(ref password) => spec.env("MYSQL_PWD", password),
        None => spec,
    }
}

fn postgres_base(program: &str, conn: &DatabaseConnection) -> CommandSpec {
    let spec = CommandSpec::new(program)
        .arg("--host")
        .arg(&conn.host)
        .arg("--port")
        .arg(conn.port.to_string())
        .arg("--username")
        .arg(&conn.user)
        .arg("--no-password");

    match conn.password {
        Some(ref password) => spec.env("PGPASSWORD", password),
        None => spec,
    }
}

/// Judge a dump: exit status and a non-empty artifact are both required
pub(crate) fn check_dump(
    result: Result<CommandOutput, CommandError>,
    conn: &DatabaseConnection,
    artifact: &Path,
) -> Result<(), SnapshotError> {
    let output = result.map_err(|e| command_failure(e, SnapshotError::DumpFailed))?;

    if !output.success {
        return Err(tool_failure(&output, SnapshotError::DumpFailed, conn));
    }

    let size = std::fs::metadata(artifact).map(|m| m.len()).unwrap_or(0);
    if size == 0 {
        return Err(SnapshotError::DumpFailed(format!(
            "Dump of {} produced no output",
            conn.target()
        )));
    }

    Ok(())
}

pub(crate) fn check_load(
    result: Result<CommandOutput, CommandError>,
    conn: &DatabaseConnection,
) -> Result<(), SnapshotError> {
    let output = result.map_err(|e| command_failure(e, SnapshotError::RestoreFailed))?;

    if !output.success {
        return Err(tool_failure(&output, SnapshotError::RestoreFailed, conn));
    }

    Ok(())
}

/// Runner errors: missing tools and deadlines become the tool's failure kind
pub(crate) fn command_failure(err: CommandError, failed: fn(String) -> SnapshotError) -> SnapshotError {
    match err {
        CommandError::Cancelled(_) => SnapshotError::Cancelled,
        CommandError::NotFound(program) => failed(format!("{} is not installed or not on PATH", program)),
        CommandError::TimedOut { .. } => failed(err.to_string()),
        CommandError::Io { program, source } => SnapshotError::io(format!("Failed to run {}", program), source),
    }
}

fn tool_failure(
    output: &CommandOutput,
    failed: fn(String) -> SnapshotError,
    conn: &DatabaseConnection,
) -> SnapshotError {
    let stderr = output.stderr.trim();

    if stderr.contains("No space left") {
        return SnapshotError::StorageExhausted(stderr.to_string());
    }

    let detail = if stderr.is_empty() {
        format!("exit code {:?}", output.exit_code)
    } else {
        stderr.to_string()
    };

    failed(format!("{}: {}", conn.target(), detail))
}
