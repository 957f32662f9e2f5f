use clap::{Parser, Subcommand};
use colored::Colorize;
use log::debug;
use tokio_util::sync::CancellationToken;

use ycloud_core::config::ProviderConfig;
use ycloud_core::provider::Provider;
use ycloud_core::resource::{ResourceId, State, Value};
use ycloud_core::schema::{AttributeSchema, ResourceSchema};
use ycloud_provider::YandexProvider;
use ycloud_provider::sweeper::{SweepContext, SweepRunner, standard_sweepers};

#[derive(Parser)]
#[command(name = "ycloud")]
#[command(about = "Inspect and clean up Yandex Cloud provider resources", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print resource and data source schemas
    Schema {
        /// Only this resource or data source type
        #[arg(long = "type")]
        resource_type: Option<String>,
    },
    /// Read one existing object and print its attributes as JSON
    Read {
        /// Resource type, e.g. yandex_kms_asymmetric_encryption_key
        resource_type: String,
        /// Cloud identifier of the object
        identifier: String,
    },
    /// Delete objects leaked by acceptance test runs
    Sweep {
        /// Run only this sweeper (and the sweepers it depends on)
        #[arg(long)]
        only: Option<String>,
        /// Only objects whose name starts with this prefix
        #[arg(long)]
        prefix: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("YC_LOG", "warn")).init();
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, cancelling...".yellow());
            on_interrupt.cancel();
        }
    });

    let result = match cli.command {
        Commands::Schema { resource_type } => run_schema(resource_type.as_deref()),
        Commands::Read {
            resource_type,
            identifier,
        } => run_read(&resource_type, &identifier, &cancel).await,
        Commands::Sweep { only, prefix } => {
            run_sweep(only.as_deref(), prefix.as_deref(), &cancel).await
        }
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn configure() -> Result<YandexProvider, String> {
    let config = ProviderConfig::from_env().map_err(|e| format!("Configuration error: {}", e))?;
    YandexProvider::new(config).map_err(|e| e.to_string())
}

fn run_schema(resource_type: Option<&str>) -> Result<(), String> {
    // Schemas need no credentials
    let config = ProviderConfig::from_attributes(&Default::default(), |_| None)
        .map_err(|e| format!("Configuration error: {}", e))?;
    let provider = YandexProvider::new(config).map_err(|e| e.to_string())?;

    let sections = [
        ("resource", provider.resource_schemas()),
        ("data source", provider.data_source_schemas()),
    ];
    let mut printed = 0;
    for (kind, schemas) in &sections {
        for schema in schemas
            .iter()
            .filter(|s| resource_type.is_none_or(|t| s.resource_type == t))
        {
            print_schema(kind, schema);
            printed += 1;
        }
    }

    if printed == 0 {
        return Err(format!(
            "Unknown resource type: {}",
            resource_type.unwrap_or_default()
        ));
    }
    Ok(())
}

fn print_schema(kind: &str, schema: &ResourceSchema) {
    println!(
        "{} {}",
        schema.resource_type.cyan().bold(),
        format!("({})", kind).dimmed()
    );
    if let Some(description) = &schema.description {
        println!("  {}", description);
    }
    let mut attributes: Vec<&AttributeSchema> = schema.attributes.values().collect();
    attributes.sort_by(|a, b| a.name.cmp(&b.name));
    for attr in attributes {
        println!("  {}", describe_attribute(attr));
    }
    println!();
}

fn describe_attribute(attr: &AttributeSchema) -> String {
    let mut flags = vec![attr.mode.to_string()];
    if attr.force_new {
        flags.push("forces replacement".to_string());
    }
    if attr.sensitive {
        flags.push("sensitive".to_string());
    }
    if let Some(default) = &attr.default {
        flags.push(format!("default {}", default.to_json()));
    }
    let mut line = format!(
        "{}: {} [{}]",
        attr.name.bold(),
        attr.attr_type,
        flags.join(", ")
    );
    if let Some(description) = &attr.description {
        line.push_str(&format!(" - {}", description));
    }
    line
}

async fn run_read(
    resource_type: &str,
    identifier: &str,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let provider = configure()?;
    let schema = provider
        .resource_schemas()
        .into_iter()
        .find(|s| s.resource_type == resource_type)
        .ok_or_else(|| format!("Unknown resource type: {}", resource_type))?;

    let id = ResourceId::new(resource_type, "cli");
    let state = provider
        .import(&id, identifier, cancel)
        .await
        .map_err(|e| e.to_string())?;
    debug!("read {} as {:?}", identifier, state.identifier);

    let json = serde_json::to_string_pretty(&state_json(&schema, &state))
        .map_err(|e| format!("Failed to serialize state: {}", e))?;
    println!("{}", json);
    Ok(())
}

/// Attributes of `state` with sensitive values masked
fn state_json(schema: &ResourceSchema, state: &State) -> serde_json::Value {
    let mut attributes = serde_json::Map::new();
    for (name, value) in &state.attributes {
        let value = if schema.is_sensitive(name) {
            Value::from("(sensitive)")
        } else {
            value.clone()
        };
        attributes.insert(name.clone(), value.to_json());
    }
    serde_json::json!({
        "type": state.id.resource_type,
        "id": state.identifier,
        "attributes": attributes,
    })
}

async fn run_sweep(
    only: Option<&str>,
    prefix: Option<&str>,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let provider = configure()?;
    let runner = SweepRunner::new(standard_sweepers(|key| std::env::var(key).ok()));
    let ctx = SweepContext {
        config: provider.config(),
        clients: provider.clients(),
        cancel,
    };

    println!(
        "{}",
        format!(
            "Sweeping {}{}",
            only.unwrap_or("all resource types"),
            prefix
                .map(|p| format!(" with prefix '{}'", p))
                .unwrap_or_default()
        )
        .cyan()
    );
    let report = runner
        .run(&ctx, only, prefix)
        .await
        .map_err(|e| e.to_string())?;
    for (sweeper, count) in &report.swept {
        println!("  {} {}: {} swept", "✓".green(), sweeper, count);
    }
    Ok(())
}
