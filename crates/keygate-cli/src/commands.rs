//! Command handlers. Each handler wires AWS clients and stores from the
//! loaded config and hands the real work to the broker crates.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use eyre::WrapErr;
use jiff::Timestamp;
use keygate_audit::{FileAuditLogger, HmacKey};
use keygate_broker::{
    ApprovalWorkflow, BreakGlassWorkflow, CredentialBroker, IssueOutcome, IssueParams,
    SessionPlane, TracingNotifier, aggregate_by_device,
};
use keygate_core::models::{ReasonCode, RequestStatus, SessionStatus};
use keygate_identity::{
    CredentialProcessOutput, IdentityResolver, StsCredentialIssuer, StsIdentityResolver,
};
use keygate_policy::cache::{PolicyCache, SsmPolicyFetcher};
use keygate_policy::{ApprovalPolicy, PolicySigner, loader};
use keygate_store::{DynamoBreakGlassStore, DynamoRequestStore, DynamoSessionStore};

use crate::config::{self, KeygateConfig};
use crate::{AuditCommands, Cli, Commands};

/// Environment marker set on `exec` subshells to prevent re-entry.
const SENTINEL_ENV: &str = "AWS_SENTINEL";

struct Context {
    config: KeygateConfig,
    sdk: aws_config::SdkConfig,
}

struct Stores {
    requests: DynamoRequestStore,
    breakglass: DynamoBreakGlassStore,
    sessions: DynamoSessionStore,
}

pub async fn run(cli: Cli) -> eyre::Result<ExitCode> {
    // verify-logs is offline tooling; it must not require a config file.
    if let Commands::Audit {
        command: AuditCommands::VerifyLogs { file, key, key_file },
    } = &cli.command
    {
        return verify_logs(file, key.as_deref(), key_file.as_deref());
    }

    let ctx = build_context(&cli).await?;
    let now = Timestamp::now();

    match cli.command {
        Commands::Credentials {
            profile,
            policy_parameter,
            duration,
            session_id,
            device_id,
            server_instance_id,
            no_session,
            log_file,
        } => {
            let params = IssueParams {
                profile,
                requested_duration_secs: duration,
                session_id,
                device_id,
                server_instance_id,
                no_session,
            };
            let outcome =
                issue_credentials(&ctx, &params, policy_parameter, log_file.as_deref(), now)
                    .await?;
            let output = CredentialProcessOutput::from(&outcome.credentials);
            println!("{}", serde_json::to_string(&output)?);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Exec {
            profile,
            policy_parameter,
            duration,
            log_file,
            argv,
        } => {
            if std::env::var_os(SENTINEL_ENV).is_some() {
                eyre::bail!(
                    "refusing to nest: this shell already runs under keygate ({SENTINEL_ENV} is set)"
                );
            }
            let params = IssueParams {
                profile,
                requested_duration_secs: duration,
                ..IssueParams::default()
            };
            let outcome =
                issue_credentials(&ctx, &params, policy_parameter, log_file.as_deref(), now)
                    .await?;
            exec_with_credentials(&outcome, &argv).await
        }

        Commands::Request {
            profile,
            duration,
            justification,
        } => {
            let actor = resolve_actor(&ctx).await?;
            let stores = build_stores(&ctx);
            let audit = audit_logger(&ctx, None)?;
            let approval_policy = load_approval_policy(&ctx).await?;
            let notifier = TracingNotifier;
            let mut workflow = ApprovalWorkflow::new(&stores.requests, &audit, &notifier);
            if let Some(policy) = &approval_policy {
                workflow = workflow.with_policy(policy);
            }
            let row = workflow
                .request(&actor, &profile, duration, &justification, now)
                .await?;
            println!("{}", serde_json::to_string_pretty(&row)?);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Approve { id, comment } => {
            decide_request(&ctx, &id, &comment, RequestStatus::Approved, now).await
        }

        Commands::Deny { id, comment } => {
            decide_request(&ctx, &id, &comment, RequestStatus::Denied, now).await
        }

        Commands::Check { id } => {
            let stores = build_stores(&ctx);
            let audit = audit_logger(&ctx, None)?;
            let notifier = TracingNotifier;
            let workflow = ApprovalWorkflow::new(&stores.requests, &audit, &notifier);
            let row = workflow.check(&id, now).await?;
            println!("{}", serde_json::to_string_pretty(&row)?);
            Ok(ExitCode::SUCCESS)
        }

        Commands::List {
            requester,
            profile,
            status,
            limit,
        } => {
            let stores = build_stores(&ctx);
            let audit = audit_logger(&ctx, None)?;
            let notifier = TracingNotifier;
            let workflow = ApprovalWorkflow::new(&stores.requests, &audit, &notifier);
            let rows = if let Some(requester) = requester {
                workflow.list_by_requester(&requester, limit).await?
            } else if let Some(profile) = profile {
                workflow.list_by_profile(&profile, limit).await?
            } else {
                let status: RequestStatus = status
                    .as_deref()
                    .unwrap_or("pending")
                    .parse()
                    .map_err(|e| eyre::eyre!("{e}"))?;
                workflow.list_by_status(status, limit).await?
            };
            println!("{}", serde_json::to_string_pretty(&rows)?);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Breakglass {
            profile,
            reason_code,
            justification,
            duration,
            request_id,
        } => {
            let reason_code: ReasonCode =
                reason_code.parse().map_err(|e| eyre::eyre!("{e}"))?;
            let actor = resolve_actor(&ctx).await?;
            let stores = build_stores(&ctx);
            let audit = audit_logger(&ctx, None)?;
            let notifier = TracingNotifier;
            let workflow = BreakGlassWorkflow::new(&stores.breakglass, &audit, &notifier);
            let event = workflow
                .invoke(
                    &actor,
                    &profile,
                    reason_code,
                    &justification,
                    duration.unwrap_or(3600),
                    request_id,
                    now,
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&event)?);
            Ok(ExitCode::SUCCESS)
        }

        Commands::BreakglassClose { id, reason } => {
            let actor = resolve_actor(&ctx).await?;
            let stores = build_stores(&ctx);
            let audit = audit_logger(&ctx, None)?;
            let notifier = TracingNotifier;
            let workflow = BreakGlassWorkflow::new(&stores.breakglass, &audit, &notifier);
            let event = workflow.close(&id, &actor, &reason, now).await?;
            println!("{}", serde_json::to_string_pretty(&event)?);
            Ok(ExitCode::SUCCESS)
        }

        Commands::ServerRevoke { id, reason } => {
            let actor = resolve_actor(&ctx).await?;
            let stores = build_stores(&ctx);
            let audit = audit_logger(&ctx, None)?;
            let notifier = TracingNotifier;
            let plane = SessionPlane::new(&stores.sessions, &audit, &notifier);
            let session = plane.revoke(&id, &actor, &reason, now).await?;
            println!("{}", serde_json::to_string_pretty(&session)?);
            Ok(ExitCode::SUCCESS)
        }

        Commands::ServerList {
            user,
            profile,
            status,
            device_id,
            by_device,
            limit,
        } => {
            let stores = build_stores(&ctx);
            let audit = audit_logger(&ctx, None)?;
            let notifier = TracingNotifier;
            let plane = SessionPlane::new(&stores.sessions, &audit, &notifier);
            let sessions = if let Some(device_id) = device_id {
                plane.list_by_device(&device_id, limit).await?
            } else if let Some(user) = user {
                plane.list_by_user(&user, limit).await?
            } else if let Some(profile) = profile {
                plane.list_by_profile(&profile, limit).await?
            } else if let Some(status) = status {
                let status: SessionStatus = match status.as_str() {
                    "active" => SessionStatus::Active,
                    "revoked" => SessionStatus::Revoked,
                    "expired" => SessionStatus::Expired,
                    other => eyre::bail!("unknown session status: {other}"),
                };
                plane.list_by_status(status, limit).await?
            } else {
                plane.list_in_range(Timestamp::UNIX_EPOCH, now, limit).await?
            };

            if by_device {
                let summaries = aggregate_by_device(&sessions);
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Audit { .. } => unreachable!("handled above"),
    }
}

async fn build_context(cli: &Cli) -> eyre::Result<Context> {
    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(prefix) = &cli.table_prefix {
        config.request_table = format!("{prefix}-requests");
        config.breakglass_table = format!("{prefix}-breakglass");
        config.session_table = format!("{prefix}-sessions");
    }

    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = cli.region.clone().or_else(|| config.region.clone()) {
        loader = loader.region(aws_config::Region::new(region));
    }
    if let Some(profile) = &cli.aws_profile {
        loader = loader.profile_name(profile);
    }

    Ok(Context {
        config,
        sdk: loader.load().await,
    })
}

fn build_stores(ctx: &Context) -> Stores {
    let ddb = aws_sdk_dynamodb::Client::new(&ctx.sdk);
    Stores {
        requests: DynamoRequestStore::new(ddb.clone(), &ctx.config.request_table),
        breakglass: DynamoBreakGlassStore::new(ddb.clone(), &ctx.config.breakglass_table),
        sessions: DynamoSessionStore::new(ddb, &ctx.config.session_table),
    }
}

fn audit_logger(ctx: &Context, log_file: Option<&Path>) -> eyre::Result<FileAuditLogger> {
    let key = config::load_audit_key(&ctx.config)?;
    let path: PathBuf = match log_file {
        Some(p) => p.to_path_buf(),
        None => match &ctx.config.audit_log_path {
            Some(p) => p.clone(),
            None => config::default_audit_log_path()?,
        },
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("creating audit log directory {}", parent.display()))?;
    }
    Ok(FileAuditLogger::new(path, key))
}

async fn resolve_actor(ctx: &Context) -> eyre::Result<String> {
    let sts = aws_sdk_sts::Client::new(&ctx.sdk);
    let identity = StsIdentityResolver::new(sts).resolve().await?;
    Ok(identity.principal_name)
}

async fn load_approval_policy(ctx: &Context) -> eyre::Result<Option<ApprovalPolicy>> {
    match &ctx.config.approval_policy_parameter {
        None => Ok(None),
        Some(parameter) => {
            let ssm = aws_sdk_ssm::Client::new(&ctx.sdk);
            Ok(Some(loader::load_approval_policy(&ssm, parameter).await?))
        }
    }
}

async fn issue_credentials(
    ctx: &Context,
    params: &IssueParams,
    policy_parameter: Option<String>,
    log_file: Option<&Path>,
    now: Timestamp,
) -> eyre::Result<IssueOutcome> {
    let sts = aws_sdk_sts::Client::new(&ctx.sdk);
    let identity = StsIdentityResolver::new(sts.clone());
    let issuer = StsCredentialIssuer::new(sts);

    let ssm = aws_sdk_ssm::Client::new(&ctx.sdk);
    let mut fetcher = SsmPolicyFetcher::new(ssm);
    if let Some(key_id) = &ctx.config.signing_key_id {
        let kms = aws_sdk_kms::Client::new(&ctx.sdk);
        fetcher = fetcher.with_signer(PolicySigner::new(kms, key_id));
    }
    let cache = PolicyCache::new(fetcher);
    let parameter = policy_parameter.unwrap_or_else(|| ctx.config.policy_parameter.clone());

    let stores = build_stores(ctx);
    let audit = audit_logger(ctx, log_file)?;

    let broker = CredentialBroker::new(
        &identity,
        &issuer,
        &cache,
        &parameter,
        &ctx.config.registry,
        &stores.requests,
        &stores.breakglass,
        &stores.sessions,
        &audit,
    );

    Ok(broker.issue(params, now).await?)
}

async fn exec_with_credentials(outcome: &IssueOutcome, argv: &[String]) -> eyre::Result<ExitCode> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| eyre::eyre!("no command given"))?;

    let creds = &outcome.credentials;
    let mut command = tokio::process::Command::new(program);
    command
        .args(args)
        .env("AWS_ACCESS_KEY_ID", &creds.access_key_id)
        .env("AWS_SECRET_ACCESS_KEY", &creds.secret_access_key)
        .env(SENTINEL_ENV, "1");
    if let Some(token) = &creds.session_token {
        command.env("AWS_SESSION_TOKEN", token);
    }
    if let Some(expiration) = &creds.expiration {
        command.env("AWS_CREDENTIAL_EXPIRATION", expiration.to_string());
    }

    let status = command
        .status()
        .await
        .wrap_err_with(|| format!("failed to run {program}"))?;
    let code = status.code().unwrap_or(1).clamp(0, 255) as u8;
    Ok(ExitCode::from(code))
}

async fn decide_request(
    ctx: &Context,
    id: &str,
    comment: &str,
    target: RequestStatus,
    now: Timestamp,
) -> eyre::Result<ExitCode> {
    let actor = resolve_actor(ctx).await?;
    let stores = build_stores(ctx);
    let audit = audit_logger(ctx, None)?;
    let approval_policy = load_approval_policy(ctx).await?;
    let notifier = TracingNotifier;
    let mut workflow = ApprovalWorkflow::new(&stores.requests, &audit, &notifier);
    if let Some(policy) = &approval_policy {
        workflow = workflow.with_policy(policy);
    }

    let row = match target {
        RequestStatus::Approved => workflow.approve(id, &actor, comment, now).await?,
        _ => workflow.deny(id, &actor, comment, now).await?,
    };
    println!("{}", serde_json::to_string_pretty(&row)?);
    Ok(ExitCode::SUCCESS)
}

fn verify_logs(
    file: &Path,
    key_hex: Option<&str>,
    key_file: Option<&Path>,
) -> eyre::Result<ExitCode> {
    let key = match (key_hex, key_file) {
        (Some(raw), _) => {
            let bytes = hex::decode(raw).wrap_err("--key must be a hex string")?;
            HmacKey::new(bytes)?
        }
        (None, Some(path)) => {
            let bytes = std::fs::read(path)
                .wrap_err_with(|| format!("failed to read key at {}", path.display()))?;
            HmacKey::new(bytes)?
        }
        (None, None) => eyre::bail!("pass --key <hex> or --key-file <path>"),
    };

    let report = keygate_audit::verify_file(file, &key)?;

    println!("scanned:            {}", report.scanned);
    println!("verified:           {}", report.verified);
    println!("invalid signatures: {}", report.invalid_signatures);
    println!("parse errors:       {}", report.parse_errors);
    for failure in &report.failures {
        println!("  line {}: {}", failure.line, failure.reason);
    }

    if report.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
