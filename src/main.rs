use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use dabble_inbound::config::{IngestConfig, SmtpConfig};
use dabble_inbound::diagnostics::TracingDiagnostics;
use dabble_inbound::notify::{LogNotifier, Notification, Notifier, SmtpNotifier};
use dabble_inbound::pipeline::attachment::HttpImageProbe;
use dabble_inbound::pipeline::{Collaborators, EmailProcessor, InboundEmail};
use dabble_inbound::store::{Database, LibSqlBackend, NewUser};
use dabble_inbound::tracking::tracker_from_config;

#[derive(Parser, Debug)]
#[command(name = "dabble-inbound", version, about = "Emailed journal entry ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest one email from a `.eml` file or a JSON-encoded inbound email.
    Process { path: PathBuf },
    /// Register a user and send them the welcome email.
    AddUser {
        email: String,
        user_key: String,
        #[arg(long, default_value = "Free")]
        plan: String,
        #[arg(long)]
        timezone: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
    },
    /// Add a writing prompt.
    AddPrompt {
        body: String,
        #[arg(long)]
        category: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = IngestConfig::from_env()?;

    // ── Database ─────────────────────────────────────────────────────────
    let db_path =
        std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/dabble.db".to_string());
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(Path::new(&db_path))
            .await
            .with_context(|| format!("Failed to open database at {db_path}"))?,
    );

    // ── Notifications ────────────────────────────────────────────────────
    let notifier: Arc<dyn Notifier> = match SmtpConfig::from_env() {
        Some(smtp) => {
            eprintln!("   Notifications: SMTP via {}:{}", smtp.host, smtp.port);
            Arc::new(SmtpNotifier::new(smtp))
        }
        None => {
            eprintln!("   Notifications: log only (set SMTP_HOST to send)");
            Arc::new(LogNotifier)
        }
    };

    match cli.command {
        Command::Process { path } => {
            let email = read_email(&path)?;
            let collaborators = Collaborators {
                db,
                notifier,
                tracker: tracker_from_config(&config),
                diagnostics: Arc::new(TracingDiagnostics),
                probe: Arc::new(HttpImageProbe::new(config.image_probe_timeout)),
            };
            let processor = EmailProcessor::new(config, collaborators);
            let outcome = processor.process(&email).await?;
            println!("{}", outcome.label());
        }
        Command::AddUser {
            email,
            user_key,
            plan,
            timezone,
            first_name,
        } => {
            let mut new_user = NewUser::new(email, user_key).with_plan(plan);
            if let Some(tz) = timezone {
                new_user = new_user.with_timezone(tz);
            }
            new_user.first_name = first_name;

            let user = db.insert_user(&new_user).await?;
            println!("user {} <{}> key={}", user.id, user.email, user.user_key);
            notifier.notify(Notification::Welcome { user }).await?;
        }
        Command::AddPrompt { body, category } => {
            let prompt = db.insert_inspiration(category.as_deref(), &body).await?;
            println!("prompt {}", prompt.id);
        }
    }

    Ok(())
}

/// `.eml` files are parsed as RFC 822; anything else is read as JSON.
fn read_email(path: &Path) -> anyhow::Result<InboundEmail> {
    let raw = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let is_eml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("eml"));

    if is_eml {
        Ok(InboundEmail::from_rfc822(&raw)?)
    } else {
        serde_json::from_slice(&raw).with_context(|| format!("Invalid email JSON in {}", path.display()))
    }
}
