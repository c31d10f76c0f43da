use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use topology_store::{
    config::{Config, CONFIG_PATH_ENV},
    filters::Filter,
    storage::elasticsearch::{
        compile_filter, search_body, ElasticSearchClient, ObjectMapping, RetryPolicy, SortOrder,
    },
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "topology-store-cli")]
#[command(about = "Topology Store Elasticsearch CLI", version, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Elasticsearch address as host:port, overrides the configuration
    #[arg(long)]
    host: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the versioned index, its mappings and the alias
    Init {
        /// Object mapping as TYPE=FILE, repeatable
        #[arg(short, long = "mapping", value_name = "TYPE=FILE")]
        mappings: Vec<String>,

        /// Give up after this many attempts instead of retrying forever
        #[arg(short = 'n', long)]
        max_attempts: Option<u32>,
    },

    /// Print the query fragment compiled from a filter (reads stdin without FILE)
    CompileFilter {
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,

        /// Prefix prepended to every field name
        #[arg(short, long, default_value = "")]
        prefix: String,
    },

    /// Fetch documents
    Get {
        #[arg(value_name = "TYPE")]
        object_type: String,

        #[arg(value_name = "ID", required = true)]
        ids: Vec<String>,
    },

    /// Delete a document
    Delete {
        #[arg(value_name = "TYPE")]
        object_type: String,

        #[arg(value_name = "ID")]
        id: String,
    },

    /// Search documents of one type
    Search {
        #[arg(value_name = "TYPE")]
        object_type: String,

        /// Filter file; every document matches without it
        #[arg(short, long)]
        filter: Option<PathBuf>,

        /// Prefix prepended to every field name
        #[arg(short, long, default_value = "")]
        prefix: String,

        /// Sort as FIELD or FIELD:asc|desc
        #[arg(short, long)]
        sort: Option<String>,

        #[arg(long)]
        size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::load().context("Failed to load configuration")?,
    };
    if let Some(host) = cli.host {
        config.storage.elasticsearch.host = host;
    }

    init_tracing(&config);

    match cli.command {
        Commands::Init {
            mappings,
            max_attempts,
        } => {
            let mappings = mappings
                .iter()
                .map(|spec| read_mapping(spec))
                .collect::<anyhow::Result<Vec<_>>>()?;

            let mut policy = RetryPolicy::forever(Duration::from_secs(1));
            if let Some(attempts) = max_attempts {
                policy = policy.with_max_attempts(attempts);
            }

            let client =
                ElasticSearchClient::new(config.storage.elasticsearch)?.with_retry_policy(policy);
            client.start(&mappings).await?;

            let descriptor = client.index_descriptor();
            println!("{} -> {}", descriptor.alias, descriptor.name);
            client.stop().await;
        }

        Commands::CompileFilter { file, prefix } => {
            let filter = read_filter(file.as_ref())?;
            let fragment = compile_filter(Some(&filter), &prefix);
            println!("{}", serde_json::to_string_pretty(&fragment)?);
        }

        Commands::Get { object_type, ids } => {
            let client = ElasticSearchClient::new(config.storage.elasticsearch)?;

            let responses = join_all(ids.iter().map(|id| client.get(&object_type, id))).await;
            for response in responses {
                println!("{}", serde_json::to_string_pretty(&response?)?);
            }
        }

        Commands::Delete { object_type, id } => {
            let client = ElasticSearchClient::new(config.storage.elasticsearch)?;
            let response = client.delete(&object_type, &id).await?;
            if !response.found {
                eprintln!("{}/{} not found", object_type, id);
            }
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Commands::Search {
            object_type,
            filter,
            prefix,
            sort,
            size,
        } => {
            let filter = filter.map(|path| read_filter(Some(&path))).transpose()?;
            let sort = sort.as_deref().map(parse_sort).transpose()?;

            let body = search_body(filter.as_ref(), &prefix, sort, size);
            let client = ElasticSearchClient::new(config.storage.elasticsearch)?;
            let result = client
                .search(&object_type, &serde_json::to_string(&body)?)
                .await?;

            eprintln!("{} hits in {}ms", result.hits.total_count(), result.took);
            println!("{}", serde_json::to_string_pretty(&result.hits.hits)?);
        }
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("topology_store={}", config.observability.log_level).into()
    });

    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn read_mapping(spec: &str) -> anyhow::Result<ObjectMapping> {
    let (object_type, path) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid mapping '{}', expected TYPE=FILE", spec))?;

    let body = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} mapping from {}", object_type, path))?;
    Ok(ObjectMapping::new(object_type, body))
}

fn read_filter(path: Option<&PathBuf>) -> anyhow::Result<Filter> {
    let json = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read filter from {}", path.display()))?,
        None => {
            let mut json = String::new();
            std::io::stdin().read_to_string(&mut json)?;
            json
        }
    };
    Filter::from_json(&json).context("Invalid filter")
}

fn parse_sort(spec: &str) -> anyhow::Result<(&str, SortOrder)> {
    match spec.split_once(':') {
        None => Ok((spec, SortOrder::Ascending)),
        Some((field, "asc")) => Ok((field, SortOrder::Ascending)),
        Some((field, "desc")) => Ok((field, SortOrder::Descending)),
        Some((_, order)) => bail!("Unknown sort order '{}', expected asc or desc", order),
    }
}
