// ABOUTME: CLI entrypoint for qbo-sync command
// ABOUTME: Handles logging setup, error exit codes, and command dispatch

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use qbo_sync::{
    api::ApiClient,
    auth::{parse_callback, OAuthSettings, TokenManager},
    cli::{Cli, Commands},
    config::Config,
    credentials::CredentialStore,
    edits::read_item_edits,
    export::{write_accounts_csv, write_items_csv},
    model::EntityKind,
    storage::Paths,
    sync::{CancelFlag, EditOutcome, Orchestrator},
    sync_state::SyncTracker,
    util::LastUpdatedFormatter,
    Error, Result,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qbo_sync=info")),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("qbo-sync: [E{}] {}", e.exit_code(), e);
        std::process::exit(e.exit_code());
    }
}

struct Context {
    cli: Cli,
    config: Config,
    paths: Paths,
    store: CredentialStore,
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let paths = Paths::new(cli.data_dir.clone())?;
    paths.ensure_dirs()?;
    let store = CredentialStore::new(&paths);

    let ctx = Context {
        cli,
        config,
        paths,
        store,
    };

    match ctx.cli.command() {
        Commands::Login { no_browser } => run_login(&ctx, no_browser),
        Commands::Refresh => run_refresh(&ctx),
        Commands::Accounts { out } => run_export(&ctx, EntityKind::Account, out),
        Commands::Items { out } => run_export(&ctx, EntityKind::Item, out),
        Commands::Push { csv, skip_pull } => run_push(&ctx, &csv, skip_pull),
        Commands::Status => run_status(&ctx),
    }
}

/// `--realm`, then the config file, then the only stored realm.
fn resolve_realm(ctx: &Context) -> Result<String> {
    if let Some(realm) = ctx.cli.realm.clone().or_else(|| ctx.config.realm_id.clone()) {
        return Ok(realm);
    }

    let mut realms = ctx.store.realms()?;
    match realms.len() {
        1 => Ok(realms.remove(0)),
        0 => Err(Error::NotAuthenticated(
            "no stored credential; run `qbo-sync login`".into(),
        )),
        _ => Err(Error::Config(format!(
            "several realms are authorized ({}); pick one with --realm",
            realms.join(", ")
        ))),
    }
}

fn token_manager(ctx: &Context) -> Result<TokenManager> {
    let client = ctx
        .config
        .client_credentials(ctx.cli.client_id.clone(), ctx.cli.client_secret.clone())?;
    let settings = OAuthSettings::from_config(&ctx.config, client);
    TokenManager::new(settings, ctx.store.clone(), ctx.config.timeout())
}

fn authenticated(ctx: &Context) -> Result<TokenManager> {
    let realm = resolve_realm(ctx)?;
    let mut tokens = token_manager(ctx)?;
    if !tokens.load_realm(&realm)? {
        return Err(Error::NotAuthenticated(format!(
            "no stored credential for realm {}; run `qbo-sync login`",
            realm
        )));
    }
    Ok(tokens)
}

fn api_client(ctx: &Context, realm: &str) -> Result<ApiClient> {
    let mut client = ApiClient::new(
        realm.to_string(),
        Some(ctx.config.api_base()),
        ctx.config.timeout(),
    )?
    .with_minor_version(ctx.config.minor_version)
    .with_retry(
        ctx.config.max_retries,
        Duration::from_millis(ctx.config.retry_base_ms),
    );

    if ctx.cli.no_throttle {
        client = client.disable_throttle();
    } else if let Some((min, max)) = ctx.cli.throttle_ms {
        client = client.with_throttle(min, max);
    }
    Ok(client)
}

fn run_login(ctx: &Context, no_browser: bool) -> Result<()> {
    let mut tokens = token_manager(ctx)?;
    let url = tokens.begin_authorization()?;

    println!("Authorize access in your browser:\n\n  {}\n", url);
    if !no_browser {
        if let Err(e) = open::that(url.as_str()) {
            tracing::warn!(error = %e, "could not open browser");
        }
    }

    print!("Paste the full redirect URL: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;

    let callback = parse_callback(&line)?;
    tokens.complete_authorization(&callback.code, &callback.state, &callback.realm_id)?;
    println!("Authorized realm {}", callback.realm_id);
    Ok(())
}

fn run_refresh(ctx: &Context) -> Result<()> {
    let mut tokens = authenticated(ctx)?;
    let current = tokens
        .credential()
        .cloned()
        .ok_or_else(|| Error::NotAuthenticated("no stored credential".into()))?;
    tokens.refresh(&current)?;
    println!("Refreshed access token for realm {}", tokens.realm().unwrap_or_default());
    Ok(())
}

fn run_export(ctx: &Context, kind: EntityKind, out: Option<PathBuf>) -> Result<()> {
    let mut tokens = authenticated(ctx)?;
    let realm = tokens.realm().unwrap_or_default().to_string();
    let client = api_client(ctx, &realm)?;
    let mut tracker = SyncTracker::load(
        ctx.paths.sync_state_file(&realm, kind)?,
        &ctx.paths.tmp_dir,
    )?;

    println!("Fetching {}s...", kind);
    let entities = Orchestrator::new(&client, &mut tokens).pull(kind, &mut tracker)?;

    let out = match out {
        Some(path) => path,
        None => ctx.paths.export_file(&realm, kind)?,
    };
    let written = match kind {
        EntityKind::Item => write_items_csv(&entities, &out, &ctx.paths.tmp_dir)?,
        EntityKind::Account => write_accounts_csv(&entities, &out, &ctx.paths.tmp_dir)?,
    };
    println!("Exported {} {}s to {}", written, kind, out.display());
    Ok(())
}

fn run_push(ctx: &Context, csv: &std::path::Path, skip_pull: bool) -> Result<()> {
    let edits = read_item_edits(csv)?;
    if edits.is_empty() {
        println!("No edits in {}", csv.display());
        return Ok(());
    }

    let mut tokens = authenticated(ctx)?;
    let realm = tokens.realm().unwrap_or_default().to_string();
    let client = api_client(ctx, &realm)?;
    let mut tracker = SyncTracker::load(
        ctx.paths.sync_state_file(&realm, EntityKind::Item)?,
        &ctx.paths.tmp_dir,
    )?;
    let formatter = LastUpdatedFormatter::new(ctx.config.utc_offset_minutes)?;
    let cancel = CancelFlag::new();
    cancel.register_signals()?;
    let mut orchestrator = Orchestrator::new(&client, &mut tokens)
        .with_formatter(formatter)
        .with_cancel(cancel);

    if !skip_pull {
        println!("Refreshing SyncTokens...");
        orchestrator.pull(EntityKind::Item, &mut tracker)?;
    }

    let pb = ProgressBar::new(edits.len() as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("[{bar:40}] {pos}/{len} items") {
        pb.set_style(style.progress_chars("##-"));
    }

    let batch = orchestrator.apply_updates(&edits, &tracker, |result| {
        match &result.outcome {
            EditOutcome::Succeeded { .. } => {}
            EditOutcome::Failed { status, reason, .. } => pb.println(format!(
                "item {} failed (status {}): {}",
                result.entity_id,
                status.map(|s| s.to_string()).unwrap_or_else(|| "none".into()),
                reason
            )),
            EditOutcome::NotAttempted { reason } => {
                pb.println(format!("item {} skipped: {}", result.entity_id, reason))
            }
        }
        pb.inc(1);
    });

    pb.finish_with_message("done");
    println!(
        "pushed {} items ({} updated, {} failed, {} not attempted)",
        batch.len(),
        batch.succeeded(),
        batch.failed(),
        batch.not_attempted()
    );
    if batch.failed() > 0 {
        println!("Run `qbo-sync items` to refresh SyncTokens before retrying failed items.");
    }

    if batch.all_succeeded() {
        Ok(())
    } else {
        Err(Error::BatchIncomplete {
            failed: batch.failed(),
            not_attempted: batch.not_attempted(),
        })
    }
}

fn run_status(ctx: &Context) -> Result<()> {
    let realms = ctx.store.realms()?;
    if realms.is_empty() {
        println!("No authorized realms. Run `qbo-sync login`.");
        return Ok(());
    }

    for realm in realms {
        let items = SyncTracker::load(
            ctx.paths.sync_state_file(&realm, EntityKind::Item)?,
            &ctx.paths.tmp_dir,
        )?;
        let accounts = SyncTracker::load(
            ctx.paths.sync_state_file(&realm, EntityKind::Account)?,
            &ctx.paths.tmp_dir,
        )?;
        println!(
            "realm {}: {} items, {} accounts tracked",
            realm,
            items.len(),
            accounts.len()
        );
    }
    Ok(())
}
