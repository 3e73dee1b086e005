use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stargraph_cli::output::print_rows;
use stargraph_core::config;
use stargraph_core::models::{EdgeType, RepoName, RepositoryFilter};
use stargraph_core::sync::SyncOptions;
use stargraph_core::AppContext;
use std::collections::HashSet;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;
    let ctx = AppContext::open(cfg).await?;
    let result = run(&ctx, cli.command).await;
    ctx.shutdown().await?;
    result
}

#[derive(Parser)]
#[command(name = "stargraph")]
#[command(about = "Search, relate and recommend your GitHub stars", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize the local store with the starred set
    Sync {
        /// Forced run; rebuilds semantic edges afterwards
        #[arg(long, default_value_t = false)]
        full: bool,
        /// Do not call the LLM for new or changed repositories
        #[arg(long, default_value_t = false)]
        skip_analysis: bool,
        /// Re-analyse repositories with new pushes
        #[arg(long, default_value_t = false)]
        force_reanalysis: bool,
        /// Rebuild author, ecosystem and collection edges after syncing
        #[arg(long, default_value_t = false)]
        rebuild_graph: bool,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Hybrid keyword and semantic search
    Search {
        query: String,
        /// Number of results
        #[arg(short, long, default_value_t = 10)]
        topk: usize,
        /// Text sent to the keyword index instead of the query
        #[arg(long)]
        keywords: Option<String>,
        /// Restrict output fields (comma-separated), e.g. full_name,final_score,match_type
        #[arg(long, value_delimiter = ',', num_args = 1.., default_values_t = Vec::<String>::new())]
        fields: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Repositories related to one starred repository
    Recommend {
        /// Repository as owner/name
        repo: String,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        /// Use graph edges only
        #[arg(long, default_value_t = false)]
        no_semantic: bool,
        /// Repositories to leave out (comma-separated)
        #[arg(long, value_delimiter = ',', num_args = 1.., default_values_t = Vec::<String>::new())]
        exclude: Vec<String>,
        #[arg(long, value_delimiter = ',', num_args = 1.., default_values_t = Vec::<String>::new())]
        fields: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Relationship graph maintenance
    Graph {
        #[command(subcommand)]
        command: GraphCommands,
    },
    /// Similarity network of the most-starred repositories
    Network {
        #[arg(long, default_value_t = 100)]
        top_n: usize,
        #[arg(short, long, default_value_t = 5)]
        k: usize,
        /// Ignore the cached network
        #[arg(long, default_value_t = false)]
        refresh: bool,
    },
    /// Recent sync runs
    Runs {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Manage collections
    Collection {
        #[command(subcommand)]
        command: CollectionCommands,
    },
    /// List stored repositories
    List {
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        min_stars: Option<i64>,
        #[arg(long, default_value_t = false)]
        include_archived: bool,
        #[arg(short, long)]
        limit: Option<i64>,
        #[arg(long, value_delimiter = ',', num_args = 1.., default_values_t = Vec::<String>::new())]
        fields: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Sync on an interval until interrupted
    Daemon {
        /// Overrides sync.interval_secs
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

#[derive(Subcommand)]
enum GraphCommands {
    /// Recompute edges of the given types (all when omitted)
    Rebuild {
        #[arg(long, value_delimiter = ',', num_args = 1.., default_values_t = Vec::<String>::new())]
        types: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Edge counts per type
    Stats,
    /// Outgoing edges of one repository
    Edges {
        repo: String,
        #[arg(long, value_delimiter = ',', num_args = 1.., default_values_t = Vec::<String>::new())]
        types: Vec<String>,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum CollectionCommands {
    Add { collection: String, repo: String },
    Remove { collection: String, repo: String },
}

async fn run(ctx: &AppContext, command: Commands) -> Result<()> {
    match command {
        Commands::Sync {
            full,
            skip_analysis,
            force_reanalysis,
            rebuild_graph,
            json,
        } => {
            let opts = SyncOptions {
                full,
                skip_analysis,
                force_reanalysis,
            };
            run_sync(ctx, opts, rebuild_graph, json).await
        }
        Commands::Search {
            query,
            topk,
            keywords,
            fields,
            json,
        } => {
            let results = ctx.search.search(&query, keywords.as_deref(), topk).await?;
            print_rows(&results, &fields, json)
        }
        Commands::Recommend {
            repo,
            limit,
            no_semantic,
            exclude,
            fields,
            json,
        } => {
            let repo: RepoName = repo.parse()?;
            let exclude: HashSet<String> = exclude.into_iter().collect();
            let recs = ctx
                .recommender
                .recommend(repo.as_str(), limit, !no_semantic, &exclude)
                .await?;
            print_rows(&recs, &fields, json)
        }
        Commands::Graph { command } => run_graph(ctx, command).await,
        Commands::Network { top_n, k, refresh } => {
            let network = ctx.similarity.get_network(top_n, k, refresh).await?;
            println!("{}", serde_json::to_string_pretty(&network)?);
            Ok(())
        }
        Commands::Runs { limit, json } => {
            let runs = ctx.store.recent_sync_runs(limit).await?;
            print_rows(&runs, &[], json)
        }
        Commands::Collection { command } => run_collection(ctx, command).await,
        Commands::List {
            owner,
            language,
            min_stars,
            include_archived,
            limit,
            fields,
            json,
        } => {
            let filter = RepositoryFilter {
                owner,
                language,
                min_stars,
                include_archived,
                limit,
            };
            let repos = ctx.store.list_repositories(&filter).await?;
            print_rows(&repos, &fields, json)
        }
        Commands::Daemon { interval_secs } => {
            let interval =
                Duration::from_secs(interval_secs.unwrap_or(ctx.config.sync.interval_secs));
            ctx.scheduler.start(interval).await?;
            tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
            info!("interrupted, stopping scheduler");
            Ok(())
        }
    }
}

async fn run_sync(ctx: &AppContext, opts: SyncOptions, rebuild_graph: bool, json: bool) -> Result<()> {
    let run = ctx.sync.run(opts).await?;
    ctx.worker.flush().await?;
    let reports = if rebuild_graph {
        ctx.graph
            .rebuild(&[EdgeType::Author, EdgeType::Ecosystem, EdgeType::Collection])
            .await?
    } else {
        Vec::new()
    };
    if json {
        let summary = serde_json::json!({
            "run": run,
            "graph": reports,
            "index": ctx.worker.stats(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "sync {}: total {}, added {}, updated {}, unchanged {}, deleted {}, failed {}",
            run.status, run.total, run.added, run.updated, run.unchanged, run.deleted, run.failed
        );
        for report in &reports {
            println!(
                "{} edges: deleted {}, inserted {}",
                report.edge_type, report.deleted, report.inserted
            );
        }
    }
    Ok(())
}

fn parse_types(types: &[String]) -> Result<Vec<EdgeType>> {
    types
        .iter()
        .map(|t| t.parse::<EdgeType>().map_err(anyhow::Error::from))
        .collect()
}

async fn run_graph(ctx: &AppContext, command: GraphCommands) -> Result<()> {
    match command {
        GraphCommands::Rebuild { types, json } => {
            let types = if types.is_empty() {
                EdgeType::ALL.to_vec()
            } else {
                parse_types(&types)?
            };
            let reports = ctx.graph.rebuild(&types).await?;
            print_rows(&reports, &[], json)
        }
        GraphCommands::Stats => {
            for (edge_type, count) in ctx.store.count_edges().await? {
                println!("{edge_type}: {count}");
            }
            Ok(())
        }
        GraphCommands::Edges {
            repo,
            types,
            limit,
            json,
        } => {
            let repo: RepoName = repo.parse()?;
            let edges = ctx
                .store
                .get_edges(repo.as_str(), &parse_types(&types)?, limit)
                .await?;
            print_rows(&edges, &[], json)
        }
    }
}

async fn run_collection(ctx: &AppContext, command: CollectionCommands) -> Result<()> {
    match command {
        CollectionCommands::Add { collection, repo } => {
            let repo: RepoName = repo.parse()?;
            ctx.store.add_to_collection(&collection, repo.as_str()).await?;
            println!("added {repo} to {collection}");
        }
        CollectionCommands::Remove { collection, repo } => {
            let repo: RepoName = repo.parse()?;
            let removed = ctx
                .store
                .remove_from_collection(&collection, repo.as_str())
                .await?;
            if removed {
                println!("removed {repo} from {collection}");
            } else {
                println!("{repo} is not in {collection}");
            }
        }
    }
    Ok(())
}
