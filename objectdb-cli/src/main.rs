//! Thin CLI front end over `objectdb-core`: one `Database::connect` per
//! invocation, one subcommand, one exit. Grounded on the teacher's
//! `aerolithdb-cli` crate's command/subcommand shape, narrowed to the
//! resource- and plugin-introspection surface this engine exposes (no
//! cluster/consensus/network subcommands — those have no counterpart here).

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use objectdb_codec::Behavior;
use objectdb_core::{Database, ResourceInit};
use objectdb_partition::PartitionDef;
use objectdb_resource::Filter;
use objectdb_schema::{AttributeValue, FieldSpec, FieldType, SchemaDef};

#[derive(Parser)]
#[command(name = "objectdb-cli", about = "Command-line client for an objectdb database")]
struct Cli {
    /// Object store connection string, e.g. `s3://key:secret@host/bucket/root`.
    /// Overrides the layered config's `connection_string` when set.
    #[arg(long, global = true)]
    connection_string: Option<String>,

    /// Use the in-memory fake object store instead of a real one.
    #[arg(long, global = true)]
    fake: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Creates a resource at schema v0.
    CreateResource {
        name: String,
        /// JSON object mapping field name to rule string, e.g.
        /// `{"status":"string|required","total":"number|optional"}`.
        #[arg(long)]
        attributes: String,
        /// One of metadata-only, body-only, mixed, user-managed.
        #[arg(long, default_value = "mixed")]
        behavior: String,
        /// Repeatable: `name=field:type[,field:type...]`, e.g. `byStatus=status:string`.
        #[arg(long = "partition")]
        partitions: Vec<String>,
    },
    /// Evolves a resource's schema to the next version.
    UpdateAttributes {
        resource: String,
        #[arg(long)]
        attributes: String,
    },
    /// Removes a resource from the registry (data preserved unless `--purge`).
    DropResource {
        resource: String,
        #[arg(long)]
        purge: bool,
    },
    /// Inserts a record; fails with `AlreadyExists` if `--id` is already taken.
    Insert {
        resource: String,
        /// JSON object of attribute values.
        #[arg(long)]
        attributes: String,
        #[arg(long)]
        id: Option<String>,
    },
    /// Fetches a record by id and prints it as JSON.
    Get { resource: String, id: String },
    /// Merges a JSON object of attributes into an existing record.
    Update {
        resource: String,
        id: String,
        #[arg(long)]
        attributes: String,
    },
    /// Deletes a record by id.
    Delete { resource: String, id: String },
    /// Lists records, optionally filtered by equality on a JSON object.
    List {
        resource: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        filter: Option<String>,
    },
    /// Lists records whose partition fields match a `field=value` selector.
    ListByPartition {
        resource: String,
        partition: String,
        /// Repeatable: `field=value`.
        #[arg(long = "select")]
        selectors: Vec<String>,
    },
    /// Lists every registered plugin and its lifecycle state.
    Plugins,
}

fn parse_schema_def(raw: &str) -> Result<SchemaDef> {
    let value: serde_json::Value = serde_json::from_str(raw).context("--attributes must be valid JSON")?;
    let object = value.as_object().context("--attributes must be a JSON object")?;
    let mut def = BTreeMap::new();
    for (field, rule) in object {
        let rule = rule.as_str().with_context(|| format!("field {field:?} rule must be a string"))?;
        def.insert(field.clone(), FieldSpec::new(rule));
    }
    Ok(def)
}

fn parse_attribute_map(raw: &str) -> Result<BTreeMap<String, AttributeValue>> {
    let value: serde_json::Value = serde_json::from_str(raw).context("--attributes must be valid JSON")?;
    let object = value.as_object().context("--attributes must be a JSON object")?;
    Ok(object.iter().map(|(k, v)| (k.clone(), AttributeValue::from(v.clone()))).collect())
}

fn parse_partition(raw: &str) -> Result<PartitionDef> {
    let (name, fields) = raw.split_once('=').with_context(|| format!("partition {raw:?} must be `name=field:type[,...]`"))?;
    let mut parsed = Vec::new();
    for field in fields.split(',') {
        let (field_name, ty) = field.split_once(':').with_context(|| format!("partition field {field:?} must be `field:type`"))?;
        let ty = FieldType::parse(ty).with_context(|| format!("unknown field type {ty:?} in partition {raw:?}"))?;
        parsed.push((field_name.to_string(), ty));
    }
    Ok(PartitionDef::new(name, parsed))
}

fn parse_selector(raw: &[String]) -> Result<std::collections::HashMap<String, String>> {
    let mut selector = std::collections::HashMap::new();
    for entry in raw {
        let (field, value) = entry.split_once('=').with_context(|| format!("selector {entry:?} must be `field=value`"))?;
        selector.insert(field.to_string(), value.to_string());
    }
    Ok(selector)
}

fn print_record(record: &objectdb_resource::Record) {
    let attributes: serde_json::Map<String, serde_json::Value> =
        record.attributes.iter().map(|(k, v)| (k.clone(), serde_json::Value::from(v))).collect();
    let out = serde_json::json!({
        "id": record.id,
        "version": record.version.to_string(),
        "createdAt": record.created_at.to_rfc3339(),
        "updatedAt": record.updated_at.to_rfc3339(),
        "attributes": attributes,
    });
    println!("{}", serde_json::to_string_pretty(&out).expect("json values never fail to serialize"));
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let mut config = objectdb_core::DatabaseConfig::load().unwrap_or_default();
    if let Some(connection_string) = cli.connection_string {
        config.connection_string = connection_string;
    }
    if cli.fake {
        config.use_fake = true;
    }

    let db = Database::new(config);
    db.connect().await.context("failed to connect to the object store")?;

    match cli.command {
        Command::CreateResource { name, attributes, behavior, partitions } => {
            let attributes = parse_schema_def(&attributes)?;
            let behavior = Behavior::parse(&behavior).with_context(|| format!("unknown behavior {behavior:?}"))?;
            let partitions = partitions.iter().map(|p| parse_partition(p)).collect::<Result<Vec<_>>>()?;
            db.create_resource(ResourceInit::new(name.clone(), attributes).with_behavior(behavior).with_partitions(partitions))
                .await?;
            println!("created resource {name:?}");
        }
        Command::UpdateAttributes { resource, attributes } => {
            let attributes = parse_schema_def(&attributes)?;
            let version = db.update_attributes(&resource, attributes).await?;
            println!("resource {resource:?} is now at schema {version}");
        }
        Command::DropResource { resource, purge } => {
            db.drop_resource(&resource, purge).await?;
            println!("dropped resource {resource:?}");
        }
        Command::Insert { resource, attributes, id } => {
            let resource_handle = lookup(&db, &resource)?;
            let attributes = parse_attribute_map(&attributes)?;
            let record = resource_handle.insert(attributes, id, None, None).await?;
            print_record(&record);
        }
        Command::Get { resource, id } => {
            let resource_handle = lookup(&db, &resource)?;
            let record = resource_handle.get(&id, None).await?;
            print_record(&record);
        }
        Command::Update { resource, id, attributes } => {
            let resource_handle = lookup(&db, &resource)?;
            let attributes = parse_attribute_map(&attributes)?;
            let record = resource_handle.update(&id, attributes, None, None).await?;
            print_record(&record);
        }
        Command::Delete { resource, id } => {
            let resource_handle = lookup(&db, &resource)?;
            let deleted = resource_handle.delete(&id, None).await?;
            println!("{}", if deleted { "deleted" } else { "not found" });
        }
        Command::List { resource, limit, offset, filter } => {
            let resource_handle = lookup(&db, &resource)?;
            let filter = match filter {
                Some(raw) => {
                    let map = parse_attribute_map(&raw)?;
                    map.into_iter().fold(Filter::new(), |f, (k, v)| f.eq(k, v))
                }
                None => Filter::new(),
            };
            let records = resource_handle.list(limit, offset, &filter, None).await?;
            for record in &records {
                print_record(record);
            }
        }
        Command::ListByPartition { resource, partition, selectors } => {
            let resource_handle = lookup(&db, &resource)?;
            let selector = parse_selector(&selectors)?;
            let records = resource_handle.list_by_partition(&partition, selector, None).await?;
            for record in &records {
                print_record(record);
            }
        }
        Command::Plugins => {
            for metadata in db.plugins() {
                println!("{} (v{}) depends_on={:?}", metadata.id, metadata.version, metadata.depends_on);
            }
        }
    }

    db.disconnect().await.ok();
    Ok(())
}

fn lookup(db: &std::sync::Arc<Database>, name: &str) -> Result<std::sync::Arc<objectdb_resource::Resource>> {
    db.resource(name).with_context(|| bail_not_found(name))
}

fn bail_not_found(name: &str) -> String {
    format!("no such resource {name:?} (did you create-resource first?)")
}
