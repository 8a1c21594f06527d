//! Parallel keyed aggregation over tumbling event-time windows.
//!
//! ```text
//! source (parallelism 2)
//!     |
//!     | FieldsHash on user id
//!     v
//! window sum (parallelism 2), 10ms tumbling windows
//! ```
//!
//! Every source subtask emits the same records with a watermark after each.
//! Each window subtask sums values per user and window, and the results are
//! checked against a sequential computation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use crabflow_core::graph::{ExecutionGraph, ExecutionVertex, JobGraph, ShipStrategy};
use crabflow_core::runtime::{Invokable, LocalExecutor, TaskContext, TaskInput};
use crabflow_core::types::StreamRecord;
use crabflow_core::window::{assign_tumbling, TumblingEventTimeWindows, WindowBuffer};
use crabflow_core::{ExecutorConfig, TaskError};

type Rec = (String, i64);
type Body = Box<dyn Invokable<Rec, ()>>;
type Sums = Arc<Mutex<BTreeMap<(String, i64), i64>>>;

const WINDOW_MS: i64 = 10;
const SOURCES: usize = 2;

fn input() -> Vec<(String, i64, i64)> {
    // (user, value, event time)
    vec![
        ("user_1".to_string(), 10, 1),
        ("user_2".to_string(), 20, 3),
        ("user_1".to_string(), 15, 8),
        ("user_3".to_string(), 30, 12),
        ("user_2".to_string(), 25, 14),
        ("user_1".to_string(), 5, 19),
        ("user_3".to_string(), 35, 21),
        ("user_2".to_string(), 10, 27),
    ]
}

fn source() -> Body {
    Box::new(|ctx: &mut TaskContext<Rec, ()>| -> Result<(), TaskError> {
        for (user, value, ts) in input() {
            ctx.emit(StreamRecord::with_timestamp((user, value), ts))?;
            ctx.emit_watermark(ts)?;
        }
        Ok(())
    })
}

fn window_sum(sums: Sums) -> Body {
    Box::new(move |ctx: &mut TaskContext<Rec, ()>| -> Result<(), TaskError> {
        let assigner = TumblingEventTimeWindows::of_millis(WINDOW_MS)
            .map_err(|err| TaskError::Failed(err.into()))?;
        let mut buffer: WindowBuffer<Rec, _, _> = WindowBuffer::new(assigner);
        loop {
            let fired = match ctx.next_input()? {
                TaskInput::Record(record) => {
                    buffer.insert(record.value, record.timestamp.unwrap_or_default())
                }
                TaskInput::Watermark(wm) => buffer.advance_time(wm.timestamp),
                TaskInput::End => break,
            };
            let mut sums = sums.lock().unwrap_or_else(|e| e.into_inner());
            for window in fired {
                for (user, value) in window.elements {
                    *sums.entry((user, window.window.start)).or_insert(0) += value;
                }
            }
        }
        println!(
            "[{}] done, {} late records dropped",
            ctx.task_name(),
            buffer.late_dropped()
        );
        Ok(())
    })
}

fn main() -> Result<()> {
    println!("=== Parallel Keyed Aggregation Example ===\n");

    let mut job = JobGraph::new("keyed-aggregation");
    let source_id = job.add_vertex("source", SOURCES);
    let window_id = job.add_vertex("window sum", 2);
    job.add_edge(source_id, window_id, ShipStrategy::FieldsHash { key_position: 0 });
    let graph = ExecutionGraph::build(&job)?.publish();

    let sums: Sums = Arc::new(Mutex::new(BTreeMap::new()));
    let sink = Arc::clone(&sums);
    let outcome = LocalExecutor::<Rec, ()>::new(graph, ExecutorConfig::default()).run(
        move |vertex: &ExecutionVertex| -> Body {
            if vertex.id.job_vertex == source_id {
                source()
            } else {
                window_sum(Arc::clone(&sink))
            }
        },
    )?;
    if let Some(failed) = outcome.first_failure() {
        anyhow::bail!("task {} failed: {:?}", failed.name, failed.result);
    }

    let mut expected: BTreeMap<(String, i64), i64> = BTreeMap::new();
    for (user, value, ts) in input() {
        let window = assign_tumbling(ts, WINDOW_MS)?;
        *expected.entry((user, window.start)).or_insert(0) += value * SOURCES as i64;
    }

    println!("\n=== Results ===");
    let sums = sums.lock().unwrap_or_else(|e| e.into_inner());
    for ((user, start), sum) in sums.iter() {
        println!("  {user} [{start}, {}) -> {sum}", start + WINDOW_MS);
    }

    println!("\n=== Validation ===");
    if *sums == expected {
        println!("All results correct!");
        Ok(())
    } else {
        anyhow::bail!("expected {expected:?}, got {sums:?}")
    }
}
