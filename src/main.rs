use anyhow::Context;
use clap::{Parser, Subcommand};
use keradb_ann::{Distance, FvecsSource, GraphIndex, IndexConfig, VectorId, VectorSource};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "keradb-ann")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "KeraDB Contributors")]
#[command(about = "KeraDB ANN - build and query Vamana graph indexes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an index from an .fvecs file
    Build {
        /// Vectors to index (.fvecs)
        #[arg(long)]
        vectors: PathBuf,

        /// Output index file
        #[arg(long)]
        out: PathBuf,

        /// JSON config file; flags below override its fields
        #[arg(long)]
        config: Option<PathBuf>,

        /// Maximum out-degree (R)
        #[arg(short = 'R', long)]
        max_degree: Option<usize>,

        /// Build list size (L)
        #[arg(short = 'L', long)]
        list_size: Option<usize>,

        /// Pruning factor
        #[arg(long)]
        alpha: Option<f32>,

        /// Distance metric: l2, dot or cosine
        #[arg(long)]
        distance: Option<Distance>,

        /// Number of overlapping clusters; more than 1 enables the sharded build
        #[arg(long)]
        shards: Option<usize>,

        /// Clusters each vector joins in the sharded build
        #[arg(long)]
        overlap: Option<usize>,

        /// Train a scalar quantizer with this many bits per dimension
        #[arg(long)]
        quantizer_bits: Option<u8>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Worker threads (0 = one per core)
        #[arg(long)]
        threads: Option<usize>,
    },

    /// Query an index, printing one JSON line per query
    Search {
        /// Index file
        #[arg(long)]
        index: PathBuf,

        /// The .fvecs file the index was built from
        #[arg(long)]
        vectors: PathBuf,

        /// Queries (.fvecs)
        #[arg(long)]
        queries: PathBuf,

        /// Results per query
        #[arg(short, default_value_t = 10)]
        k: usize,

        /// Search list size (L')
        #[arg(short)]
        l: Option<usize>,

        /// Traverse with quantized codes and rerank exactly
        #[arg(long)]
        quantized: bool,
    },

    /// Show index statistics
    Stats {
        /// Index file
        #[arg(long)]
        index: PathBuf,

        /// The .fvecs file the index was built from
        #[arg(long)]
        vectors: PathBuf,
    },
}

#[derive(Serialize)]
struct QueryResult {
    query: usize,
    results: Vec<Neighbor>,
}

#[derive(Serialize)]
struct Neighbor {
    id: VectorId,
    distance: f32,
}

fn open_source(path: &PathBuf) -> anyhow::Result<Arc<dyn VectorSource>> {
    let source = FvecsSource::open(path)
        .with_context(|| format!("Failed to open vectors {}", path.display()))?;
    Ok(Arc::new(source))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            vectors,
            out,
            config,
            max_degree,
            list_size,
            alpha,
            distance,
            shards,
            overlap,
            quantizer_bits,
            seed,
            threads,
        } => {
            let mut cfg = match config {
                Some(path) => IndexConfig::from_json_file(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?,
                None => IndexConfig::default(),
            };
            if let Some(r) = max_degree {
                cfg.max_degree = r;
            }
            if let Some(l) = list_size {
                cfg.build_list_size = l;
            }
            if let Some(a) = alpha {
                cfg.alpha = a;
            }
            if let Some(d) = distance {
                cfg.distance = d;
            }
            if let Some(s) = shards {
                cfg.shard_count = s;
            }
            if let Some(o) = overlap {
                cfg.overlap_factor = o;
            }
            if let Some(bits) = quantizer_bits {
                cfg.quantizer_bits = Some(bits);
            }
            if let Some(s) = seed {
                cfg.seed = s;
            }
            if let Some(t) = threads {
                cfg.num_threads = t;
            }
            cfg.validate()?;

            let source = open_source(&vectors)?;
            let start = Instant::now();
            let index = GraphIndex::build(cfg, source)?;
            index.save(&out)?;

            let stats = index.stats();
            println!("Built index: {}", out.display());
            println!("  Nodes: {}", stats.node_count);
            println!("  Avg out-degree: {:.2}", stats.avg_out_degree);
            println!("  Reachable from entry: {}", stats.reachable);
            println!("  Time: {:.2?}", start.elapsed());
        }

        Commands::Search {
            index,
            vectors,
            queries,
            k,
            l,
            quantized,
        } => {
            let source = open_source(&vectors)?;
            let graph = GraphIndex::open(&index, source)
                .with_context(|| format!("Failed to open index {}", index.display()))?;
            if let Some(l) = l {
                graph.set_search_list_size(l);
            }

            let queries = FvecsSource::open(&queries)
                .with_context(|| format!("Failed to open queries {}", queries.display()))?;
            for i in 0..queries.len() {
                let query = queries.vector_for_id(i as VectorId)?;
                let results = if quantized {
                    graph.search_quantized(&query, k)?
                } else {
                    graph.search(&query, k)?
                };
                let line = QueryResult {
                    query: i,
                    results: results
                        .into_iter()
                        .map(|(id, distance)| Neighbor { id, distance })
                        .collect(),
                };
                println!("{}", serde_json::to_string(&line)?);
            }
        }

        Commands::Stats { index, vectors } => {
            let source = open_source(&vectors)?;
            let graph = GraphIndex::open(&index, source)
                .with_context(|| format!("Failed to open index {}", index.display()))?;
            println!("{}", serde_json::to_string_pretty(&graph.stats())?);
        }
    }

    Ok(())
}
