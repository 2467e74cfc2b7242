use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "keygate", version, about = "Policy-gated AWS credential broker")]
struct Cli {
    /// Config file (default: <os-config-dir>/keygate/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// AWS region override
    #[arg(long, global = true)]
    region: Option<String>,

    /// AWS credential profile to call AWS with (not a keygate profile)
    #[arg(long, global = true)]
    aws_profile: Option<String>,

    /// Store-table prefix override (tables become <prefix>-requests,
    /// <prefix>-breakglass, <prefix>-sessions)
    #[arg(long, global = true)]
    table_prefix: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue temporary credentials; credential-process JSON on stdout
    Credentials {
        #[arg(long)]
        profile: String,
        /// SSM parameter holding the access policy
        #[arg(long)]
        policy_parameter: Option<String>,
        /// Requested duration in seconds
        #[arg(long)]
        duration: Option<i64>,
        /// Re-issue against an existing session lineage
        #[arg(long)]
        session_id: Option<String>,
        #[arg(long)]
        device_id: Option<String>,
        #[arg(long)]
        server_instance_id: Option<String>,
        /// Skip creating a session row
        #[arg(long)]
        no_session: bool,
        /// Audit log file override
        #[arg(long)]
        log_file: Option<PathBuf>,
    },

    /// Issue credentials and run a command with them in the environment
    Exec {
        #[arg(long)]
        profile: String,
        #[arg(long)]
        policy_parameter: Option<String>,
        #[arg(long)]
        duration: Option<i64>,
        #[arg(long)]
        log_file: Option<PathBuf>,
        /// The command to run
        #[arg(trailing_var_arg = true, required = true)]
        argv: Vec<String>,
    },

    /// Create an access request
    Request {
        #[arg(long)]
        profile: String,
        /// Requested duration in seconds
        #[arg(long, default_value_t = 3600)]
        duration: i64,
        #[arg(long)]
        justification: String,
    },

    /// Approve a pending request
    Approve {
        id: String,
        #[arg(long, default_value = "")]
        comment: String,
    },

    /// Deny a pending request
    Deny {
        id: String,
        #[arg(long, default_value = "")]
        comment: String,
    },

    /// Show one request
    Check { id: String },

    /// List requests by requester, profile, or status
    List {
        #[arg(long)]
        requester: Option<String>,
        #[arg(long)]
        profile: Option<String>,
        /// pending | approved | denied | expired | consumed
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i32,
    },

    /// Invoke emergency break-glass access
    Breakglass {
        #[arg(long)]
        profile: String,
        /// incident | maintenance | security | recovery | other
        #[arg(long)]
        reason_code: String,
        #[arg(long)]
        justification: String,
        /// Duration in seconds (capped at 4 hours)
        #[arg(long)]
        duration: Option<i64>,
        /// Correlated access-request ID
        #[arg(long)]
        request_id: Option<String>,
    },

    /// Close an active break-glass event
    BreakglassClose {
        id: String,
        #[arg(long)]
        reason: String,
    },

    /// Revoke a server session
    ServerRevoke {
        id: String,
        #[arg(long)]
        reason: String,
    },

    /// List server sessions, optionally aggregated per device
    ServerList {
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        profile: Option<String>,
        /// active | revoked | expired
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        device_id: Option<String>,
        /// Group by device and flag anomalies
        #[arg(long)]
        by_device: bool,
        #[arg(long, default_value_t = 50)]
        limit: i32,
    },

    /// Audit-log tooling
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
}

#[derive(Subcommand)]
enum AuditCommands {
    /// Verify every HMAC signature in a log file
    VerifyLogs {
        file: PathBuf,
        /// Signing key as a hex string
        #[arg(long)]
        key: Option<String>,
        /// File holding the raw signing key bytes
        #[arg(long)]
        key_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match commands::run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
