use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use catalog_cache::NotificationOutcome;
use catalog_core::{
    AuthContext, ConfigManager, DocumentKey, DocumentStore, EntityId, EntityKind, Permission,
    Settings, StoredDocument, TokenVerifier,
};
use catalog_graph::{await_notification, CatalogService, EditInput, MemoryStore};

#[derive(Parser)]
#[command(name = "catalog")]
#[command(about = "Catalog CLI - consistent edits and cache repair for the game catalog", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format (json, pretty)
    #[arg(short, long, global = true, default_value = "pretty")]
    output: OutputFormat,

    /// Path of the JSON document store
    #[arg(long, global = true, env = "CATALOG_DATA")]
    data: Option<PathBuf>,

    /// Configuration directory
    #[arg(long, global = true, env = "CATALOG_CONFIG_DIR")]
    config: Option<PathBuf>,

    /// Operator bearer token
    #[arg(long, global = true, env = "CATALOG_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update an entity and propagate the change to related documents
    Edit {
        /// Entity kind (game, character, album, track, staff)
        #[arg(short, long)]
        kind: EntityKind,

        /// Entity id; a new id is generated when omitted
        #[arg(long)]
        id: Option<String>,

        /// JSON file holding `fields` and `relations`
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Recompute every cache field of one entity
    Rebuild {
        #[arg(short, long)]
        kind: EntityKind,

        #[arg(long)]
        id: String,
    },

    /// Rescan a kind and rewrite its aggregate cache document
    RebuildAggregate {
        #[arg(short, long)]
        kind: EntityKind,
    },

    /// Print an entity document, or the aggregate document when no id is given
    Show {
        #[arg(short, long)]
        kind: EntityKind,

        #[arg(long)]
        id: Option<String>,
    },
}

/// Contents of an edit input file: the entity's complete new state.
#[derive(Deserialize)]
struct EditRequest {
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(default)]
    relations: BTreeMap<String, Vec<EntityId>>,
}

// Output structures
#[derive(Serialize)]
struct EditResult {
    kind: String,
    id: String,
    created: bool,
    patches: usize,
    summary_changed: bool,
    committed_at: String,
    invalidated_paths: Vec<String>,
    notification: NotificationOutcome,
}

#[derive(Serialize)]
struct RebuildResult {
    kind: String,
    id: String,
    fields: Vec<catalog_graph::CacheFieldReport>,
    committed_at: String,
    notification: NotificationOutcome,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = ConfigManager::load(cli.config.clone()).context("Failed to load configuration")?;
    init_tracing(&settings);

    match execute_command(&cli, &settings).await {
        Ok(output) => {
            print_output(&cli.output, &output)?;
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn init_tracing(settings: &Settings) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn authenticate(cli: &Cli, settings: &Settings) -> Result<AuthContext> {
    let Some(token) = cli.token.as_deref() else {
        return Ok(AuthContext::anonymous());
    };
    let secret = settings
        .auth
        .jwt_secret
        .as_ref()
        .ok_or_else(|| anyhow!("auth.jwt_secret must be configured to verify tokens"))?;
    let auth = TokenVerifier::new(secret)
        .verify(token)
        .context("Invalid operator token")?;
    debug!("Authenticated as {}", auth.subject);
    Ok(auth)
}

async fn execute_command(cli: &Cli, settings: &Settings) -> Result<Value> {
    let data_path = cli
        .data
        .clone()
        .unwrap_or_else(|| PathBuf::from(&settings.store.data_path));
    let store = Arc::new(
        MemoryStore::load_json(&data_path, settings.store.limits())
            .with_context(|| format!("Failed to load catalog data from {}", data_path.display()))?,
    );
    let service = CatalogService::new(store.clone(), settings)
        .context("Failed to initialize catalog service")?;
    let auth = authenticate(cli, settings)?;

    match &cli.command {
        Commands::Edit { kind, id, input } => {
            let output = execute_edit(&service, &auth, *kind, id.as_deref(), input).await?;
            save(&store, &data_path)?;
            Ok(output)
        }
        Commands::Rebuild { kind, id } => {
            let outcome = service
                .rebuild(&auth, *kind, &EntityId::from(id.as_str()))
                .await
                .context("Cache rebuild failed")?;
            save(&store, &data_path)?;
            let result = RebuildResult {
                kind: outcome.report.kind.to_string(),
                id: outcome.report.id.to_string(),
                committed_at: outcome.report.receipt.committed_at.to_rfc3339(),
                fields: outcome.report.fields,
                notification: await_notification(outcome.notification).await,
            };
            Ok(serde_json::to_value(result)?)
        }
        Commands::RebuildAggregate { kind } => {
            let report = service
                .rebuild_aggregate(&auth, *kind)
                .await
                .context("Aggregate rebuild failed")?;
            save(&store, &data_path)?;
            Ok(serde_json::to_value(report)?)
        }
        Commands::Show { kind, id } => {
            let doc = match id {
                Some(id) => service
                    .load(&auth, *kind, &EntityId::from(id.as_str()))
                    .await
                    .context("Failed to load entity")?,
                None => {
                    auth.require(Permission::ReadCatalog)?;
                    store
                        .get(&DocumentKey::aggregate(*kind))
                        .await?
                        .ok_or_else(|| anyhow!("No aggregate document for {}", kind))?
                }
            };
            Ok(Value::Object(doc.fields))
        }
    }
}

async fn execute_edit(
    service: &CatalogService<MemoryStore>,
    auth: &AuthContext,
    kind: EntityKind,
    id: Option<&str>,
    input: &Path,
) -> Result<Value> {
    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let request: EditRequest =
        serde_json::from_str(&raw).context("Edit input must hold `fields` and `relations`")?;

    let id = id.map(EntityId::from).unwrap_or_else(EntityId::generate);
    let snapshot = match service.load(auth, kind, &id).await {
        Ok(doc) => Some(doc),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e).context("Failed to load entity snapshot"),
    };
    let created = snapshot.is_none();

    let input = edit_input(kind, id, snapshot, request)?;
    let outcome = service.edit(auth, input).await.context("Edit failed")?;

    let result = EditResult {
        kind: outcome.kind.to_string(),
        id: outcome.id.to_string(),
        created,
        patches: outcome.patches,
        summary_changed: outcome.summary_changed,
        committed_at: outcome.receipt.committed_at.to_rfc3339(),
        invalidated_paths: outcome.invalidated_paths,
        notification: await_notification(outcome.notification).await,
    };
    Ok(serde_json::to_value(result)?)
}

/// Relation fields missing from the request keep their current ids when the
/// entity already exists.
fn edit_input(
    kind: EntityKind,
    id: EntityId,
    snapshot: Option<StoredDocument>,
    request: EditRequest,
) -> Result<EditInput> {
    let mut input = match snapshot {
        Some(snapshot) => EditInput::update(snapshot, request.fields)?,
        None => EditInput::create(kind, id, request.fields),
    };
    for (field, ids) in request.relations {
        input = input.with_relation(&field, ids);
    }
    Ok(input)
}

fn save(store: &MemoryStore, path: &Path) -> Result<()> {
    store
        .save_json(path)
        .with_context(|| format!("Failed to save catalog data to {}", path.display()))
}

fn print_output(format: &OutputFormat, value: &Value) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Pretty => {
            print_pretty(value, 0)?;
        }
    }
    Ok(())
}

fn print_pretty(value: &Value, depth: usize) -> Result<()> {
    let indent = "  ".repeat(depth);
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                let key_colored = key.cyan().bold();
                match val {
                    Value::String(s) => println!("{}{}: {}", indent, key_colored, s.green()),
                    Value::Number(n) => {
                        println!("{}{}: {}", indent, key_colored, n.to_string().yellow())
                    }
                    Value::Bool(b) => {
                        let val_colored = if *b { "true".green() } else { "false".red() };
                        println!("{}{}: {}", indent, key_colored, val_colored);
                    }
                    Value::Object(_) => {
                        println!("{}{}:", indent, key_colored);
                        print_pretty(val, depth + 1)?;
                    }
                    _ => println!("{}{}: {}", indent, key_colored, val),
                }
            }
        }
        Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                println!("\n{}{}{}:", indent, "Item ".cyan(), (i + 1).to_string().yellow());
                print_pretty(item, depth + 1)?;
            }
        }
        _ => {
            println!("{}{}", indent, serde_json::to_string_pretty(value)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::fields;
    use serde_json::json;

    fn snapshot() -> StoredDocument {
        let mut doc = StoredDocument::new(
            DocumentKey::entity(EntityKind::Game, "ys-origin"),
            catalog_core::object_fields(json!({
                "name": "Ys Origin",
                "characterIds": ["adol"],
                "soundtrackIds": ["m1"],
            }))
            .unwrap(),
        );
        doc.version = 3;
        doc
    }

    fn request(raw: Value) -> EditRequest {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn omitted_relations_keep_current_ids() {
        let input = edit_input(
            EntityKind::Game,
            EntityId::from("ys-origin"),
            Some(snapshot()),
            request(json!({
                "fields": { "name": "Ys Origin (PC)" },
                "relations": { "characterIds": ["dogi"] }
            })),
        )
        .unwrap();

        assert_eq!(
            input.relations[fields::CHARACTER_IDS],
            vec![EntityId::from("dogi")]
        );
        assert_eq!(
            input.relations[fields::SOUNDTRACK_IDS],
            vec![EntityId::from("m1")]
        );
        assert_eq!(input.snapshot.map(|doc| doc.version), Some(3));
    }

    #[test]
    fn request_without_relations_key_changes_fields_only() {
        let input = edit_input(
            EntityKind::Game,
            EntityId::from("ys-origin"),
            Some(snapshot()),
            request(json!({ "fields": { "name": "Ys Origin (PC)" } })),
        )
        .unwrap();

        assert_eq!(
            input.relations[fields::CHARACTER_IDS],
            vec![EntityId::from("adol")]
        );
        assert_eq!(input.fields["name"], json!("Ys Origin (PC)"));
    }

    #[test]
    fn new_entity_takes_request_relations_as_given() {
        let input = edit_input(
            EntityKind::Game,
            EntityId::from("ys-celceta"),
            None,
            request(json!({ "relations": { "characterIds": ["adol"] } })),
        )
        .unwrap();

        assert!(input.snapshot.is_none());
        assert_eq!(input.relations.len(), 1);
        assert_eq!(input.id, EntityId::from("ys-celceta"));
    }
}
