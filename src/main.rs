use clap::Parser;
use miette::{IntoDiagnostic, Result};
use payout_engine::application::ledger::Ledger;
use payout_engine::application::reconciliation::WebhookProcessor;
use payout_engine::application::service::{ServiceConfig, WithdrawalService};
use payout_engine::domain::event::PayoutEvent;
use payout_engine::domain::ports::{EventStoreRef, LedgerStoreRef, RequestStoreRef};
use payout_engine::domain::request::{RequestFilter, WithdrawalRequest};
use payout_engine::error::WithdrawalError;
use payout_engine::infrastructure::local::{SequentialPayoutGateway, TracingNotifier};
use payout_engine::interfaces::report::ReportWriter;
use payout_engine::interfaces::script::{Operation, OperationReader};
use payout_engine::interfaces::webhook::{WebhookDelivery, WebhookEndpoint, sign};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input operations script, one JSON object per line
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Shared secret used to sign and verify synthetic webhook deliveries
    #[arg(long, default_value = "local-secret")]
    webhook_secret: String,
}

/// Maps a stable script label ("alice", "admin-1") to a deterministic id, so
/// persistent runs against the same database keep referring to the same
/// users.
fn label_id(label: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, label.as_bytes())
}

fn open_stores(
    db_path: Option<PathBuf>,
) -> Result<(LedgerStoreRef, RequestStoreRef, EventStoreRef)> {
    use payout_engine::infrastructure::in_memory::{
        InMemoryEventStore, InMemoryLedgerStore, InMemoryRequestStore,
    };

    if let Some(path) = db_path {
        #[cfg(feature = "storage-rocksdb")]
        {
            let store =
                Arc::new(payout_engine::infrastructure::rocksdb::RocksDbStore::open(path)
                    .into_diagnostic()?);
            return Ok((store.clone(), store.clone(), store));
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        {
            let _ = path;
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
        }
    }
    Ok((
        Arc::new(InMemoryLedgerStore::new()),
        Arc::new(InMemoryRequestStore::new()),
        Arc::new(InMemoryEventStore::new()),
    ))
}

async fn resolve_request(
    service: &WithdrawalService,
    user: Uuid,
    key: &str,
) -> payout_engine::error::Result<WithdrawalRequest> {
    service
        .find_request(user, key)
        .await?
        .ok_or_else(|| WithdrawalError::Validation(format!("No request for key {key}")))
}

async fn apply(
    service: &WithdrawalService,
    endpoint: &WebhookEndpoint,
    secret: &str,
    op: Operation,
) -> payout_engine::error::Result<()> {
    match op {
        Operation::OpenAccount { user, currency } => {
            service.open_account(label_id(&user), &currency).await?;
        }
        Operation::Credit {
            user,
            amount,
            currency,
        } => {
            service.credit(label_id(&user), amount, &currency).await?;
        }
        Operation::CreateWithdrawal {
            user,
            amount,
            currency,
            bank_account_ref,
            key,
        } => {
            service
                .create_request(label_id(&user), amount, &currency, &bank_account_ref, &key)
                .await?;
        }
        Operation::Cancel { user, key } => {
            let user = label_id(&user);
            let request = resolve_request(service, user, &key).await?;
            service.cancel_request(request.id, user).await?;
        }
        Operation::Approve { user, key, admin } => {
            let request = resolve_request(service, label_id(&user), &key).await?;
            service.approve(request.id, label_id(&admin)).await?;
        }
        Operation::Reject {
            user,
            key,
            admin,
            reason,
        } => {
            let request = resolve_request(service, label_id(&user), &key).await?;
            service.reject(request.id, label_id(&admin), &reason).await?;
        }
        Operation::Webhook {
            event_id,
            user,
            key,
            outcome,
        } => {
            let request = resolve_request(service, label_id(&user), &key).await?;
            let payout_id = request.external_payout_id.ok_or_else(|| {
                WithdrawalError::Validation(format!("Request for key {key} has no payout yet"))
            })?;
            let event = PayoutEvent {
                external_event_id: event_id,
                external_payout_id: payout_id,
                outcome,
            };
            let body = serde_json::to_vec(&event)?;
            let signature = sign(secret, &body);
            let response = endpoint.handle(WebhookDelivery { body, signature }).await;
            if !response.acknowledged {
                return Err(WithdrawalError::Validation(
                    "Webhook delivery was not acknowledged".to_string(),
                ));
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let (ledger_store, request_store, event_store) = open_stores(cli.db_path)?;

    let ledger = Ledger::new(ledger_store);
    let service = WithdrawalService::new(
        ledger.clone(),
        request_store.clone(),
        Arc::new(SequentialPayoutGateway::new()),
        Arc::new(TracingNotifier::new()),
        ServiceConfig::default(),
    );
    let processor = WebhookProcessor::new(
        request_store,
        event_store,
        ledger,
        Arc::new(TracingNotifier::new()),
        cli.webhook_secret.clone(),
    );
    let endpoint = WebhookEndpoint::new(processor);

    let file = File::open(cli.input).into_diagnostic()?;
    let reader = OperationReader::new(BufReader::new(file));
    for op_result in reader.operations() {
        match op_result {
            Ok(op) => {
                if let Err(e) = apply(&service, &endpoint, &cli.webhook_secret, op).await {
                    eprintln!("Error processing operation: {e}");
                }
            }
            Err(e) => {
                eprintln!("Error reading operation: {e}");
            }
        }
    }

    let entries = service.ledger_entries().await.into_diagnostic()?;
    let requests = service
        .list_requests(RequestFilter::default())
        .await
        .into_diagnostic()?;

    let stdout = io::stdout();
    ReportWriter::new(stdout.lock())
        .write_report(entries, requests)
        .into_diagnostic()?;

    Ok(())
}
