use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crabflow_core::graph::{ExecutionGraph, ExecutionVertex, JobGraph, ShipStrategy};
use crabflow_core::runtime::{Invokable, LocalExecutor, TaskContext, TaskInput};
use crabflow_core::types::StreamRecord;
use crabflow_core::{ExecutorConfig, TaskError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "crabflow")]
#[command(about = "crabflow job plan and local execution CLI", long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Expand a JSON job plan and print its execution graph.
    Inspect {
        #[arg(long)]
        plan: PathBuf,
    },
    /// Run a two-stage demo job on local threads.
    Demo {
        #[arg(long, default_value_t = 2)]
        producers: usize,
        #[arg(long, default_value_t = 3)]
        consumers: usize,
        #[arg(long, value_enum, default_value_t = Ship::Hash)]
        ship: Ship,
        /// Records emitted by each producer subtask.
        #[arg(long, default_value_t = 1000)]
        records: u64,
        #[arg(long, default_value_t = 16)]
        keys: u64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Ship {
    Hash,
    Broadcast,
    Forward,
    Pointwise,
}

impl From<Ship> for ShipStrategy {
    fn from(ship: Ship) -> Self {
        match ship {
            Ship::Hash => ShipStrategy::FieldsHash { key_position: 0 },
            Ship::Broadcast => ShipStrategy::Broadcast,
            Ship::Forward => ShipStrategy::Forward,
            Ship::Pointwise => ShipStrategy::Pointwise,
        }
    }
}

type Rec = (String, u64);
type Body = Box<dyn Invokable<Rec, ()>>;
type Counts = Arc<Mutex<BTreeMap<usize, u64>>>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log);
    match cli.command {
        Commands::Inspect { plan } => inspect(&plan)?,
        Commands::Demo {
            producers,
            consumers,
            ship,
            records,
            keys,
        } => demo(producers, consumers, ship.into(), records, keys).await?,
    }
    Ok(())
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn inspect(path: &Path) -> Result<()> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read job plan {}", path.display()))?;
    let job = JobGraph::from_json(&json)?;
    let graph = ExecutionGraph::build(&job)?;

    println!(
        "job '{}': {} execution vertices, {} edges",
        graph.job_name(),
        graph.num_vertices(),
        graph.edges().len()
    );
    for vertex in graph.vertices() {
        println!(
            "  {} [{}] inputs={}",
            vertex.task_name(),
            vertex.id,
            vertex.inputs.len()
        );
    }
    for partition in graph.partitions() {
        println!("partition {}", partition.id());
        for (index, group) in partition.groups().iter().enumerate() {
            let consumers: Vec<String> = graph
                .group_edges(group)
                .map(|edge| edge.consumer.to_string())
                .collect();
            println!(
                "  group {index}: {:?} -> {} [{}]",
                group.ship,
                group.target,
                consumers.join(", ")
            );
        }
    }
    Ok(())
}

async fn demo(
    producers: usize,
    consumers: usize,
    ship: ShipStrategy,
    records: u64,
    keys: u64,
) -> Result<()> {
    let mut job = JobGraph::new("demo");
    let source = job.add_vertex("source", producers);
    let sink = job.add_vertex("count", consumers);
    job.add_edge(source, sink, ship);
    let graph = ExecutionGraph::build(&job)?.publish();

    let counts: Counts = Arc::new(Mutex::new(BTreeMap::new()));
    let sink_counts = Arc::clone(&counts);
    let mut executor = LocalExecutor::<Rec, ()>::new(graph, ExecutorConfig::default());
    executor.start(move |vertex: &ExecutionVertex| -> Body {
        if vertex.id.job_vertex == source {
            source_body(records, keys.max(1))
        } else {
            count_body(Arc::clone(&sink_counts))
        }
    })?;

    let cancel = executor.cancel_handle();
    let mut join = tokio::task::spawn_blocking(move || executor.join());
    let outcome = tokio::select! {
        outcome = &mut join => outcome?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; cancelling job");
            cancel.cancel();
            join.await?
        }
    };

    let counts = counts.lock().unwrap_or_else(PoisonError::into_inner);
    for (subtask, count) in counts.iter() {
        println!("count ({}/{consumers}): {count} records", subtask + 1);
    }
    if let Some(failed) = outcome.first_failure() {
        if let Err(err) = &failed.result {
            anyhow::bail!("task {} failed: {err}", failed.name);
        }
    }
    if outcome.was_cancelled() {
        info!("demo job cancelled");
    } else {
        info!(total = counts.values().sum::<u64>(), "demo job finished");
    }
    Ok(())
}

/// Emits `records` keyed records tagged for forward routing, with a
/// watermark after every record.
fn source_body(records: u64, keys: u64) -> Body {
    Box::new(move |ctx: &mut TaskContext<Rec, ()>| -> Result<(), TaskError> {
        let subtask = ctx.subtask_index() as u64;
        for i in 0..records {
            ctx.check_cancelled()?;
            let record =
                StreamRecord::with_timestamp((format!("key-{}", i % keys), 1), i as i64).tagged(subtask);
            ctx.emit(record)?;
            ctx.emit_watermark(i as i64)?;
        }
        Ok(())
    })
}

fn count_body(counts: Counts) -> Body {
    Box::new(move |ctx: &mut TaskContext<Rec, ()>| -> Result<(), TaskError> {
        let mut total = 0;
        loop {
            match ctx.next_input()? {
                TaskInput::Record(record) => total += record.value.1,
                TaskInput::Watermark(_) => {}
                TaskInput::End => break,
            }
        }
        counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ctx.subtask_index(), total);
        Ok(())
    })
}
