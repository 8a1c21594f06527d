use super::*;

fn two_vertex_job(p: usize, c: usize, ship: ShipStrategy) -> (JobGraph, JobVertexId, JobVertexId) {
    let mut job = JobGraph::new("test");
    let producer = job.add_vertex("producer", p);
    let consumer = job.add_vertex("consumer", c);
    job.add_edge(producer, consumer, ship);
    (job, producer, consumer)
}

#[test]
fn test_build_creates_parallel_instances() {
    let (job, producer, consumer) = two_vertex_job(2, 3, ShipStrategy::Broadcast);
    let graph = ExecutionGraph::build(&job).unwrap();

    assert_eq!(graph.num_vertices(), 5);
    assert_eq!(graph.subtasks(producer).count(), 2);
    assert_eq!(graph.subtasks(consumer).count(), 3);
    let names: Vec<String> = graph.subtasks(consumer).map(|v| v.task_name()).collect();
    assert_eq!(names, vec!["consumer (1/3)", "consumer (2/3)", "consumer (3/3)"]);
}

#[test]
fn test_broadcast_producer_partitions() {
    let (job, producer, consumer) = two_vertex_job(2, 3, ShipStrategy::Broadcast);
    let graph = ExecutionGraph::build(&job).unwrap();

    for subtask in graph.subtasks(producer) {
        let partition = graph.partition(subtask.produced_partition.unwrap()).unwrap();
        assert_eq!(partition.producer(), subtask.id);
        assert_eq!(partition.groups().len(), 1);

        let group = &partition.groups()[0];
        assert_eq!(group.pattern(), DistributionPattern::Broadcast);
        let consumers: Vec<usize> = graph
            .group_edges(group)
            .map(|e| e.consumer.subtask_index)
            .collect();
        assert_eq!(consumers, vec![0, 1, 2]);
    }

    // Every consumer reads one channel from each producer.
    for subtask in graph.subtasks(consumer) {
        assert_eq!(subtask.produced_partition, None);
        assert_eq!(graph.input_edges(subtask.id).len(), 2);
    }
}

#[test]
fn test_hash_partitioned_all_to_all() {
    let (job, producer, _) = two_vertex_job(4, 4, ShipStrategy::FieldsHash { key_position: 0 });
    let graph = ExecutionGraph::build(&job).unwrap();

    assert_eq!(graph.edges().len(), 16);
    for subtask in graph.subtasks(producer) {
        let partition = graph.partition(subtask.produced_partition.unwrap()).unwrap();
        assert_eq!(partition.groups().len(), 1);
        assert_eq!(partition.groups()[0].num_channels(), 4);
        let subpartitions: Vec<usize> = graph
            .group_edges(&partition.groups()[0])
            .map(|e| e.subpartition)
            .collect();
        assert_eq!(subpartitions, vec![0, 1, 2, 3]);
    }
}

#[test]
fn test_two_consumer_groups_on_one_partition() {
    let mut job = JobGraph::new("fanout");
    let source = job.add_vertex("source", 2);
    let audit = job.add_vertex("audit", 1);
    let agg = job.add_vertex("aggregate", 3);
    job.add_edge(source, audit, ShipStrategy::Broadcast);
    job.add_edge(source, agg, ShipStrategy::FieldsHash { key_position: 0 });

    let graph = ExecutionGraph::build(&job).unwrap();
    let first = graph.subtasks(source).next().unwrap();
    let partition = graph.partition(first.produced_partition.unwrap()).unwrap();

    assert_eq!(partition.groups().len(), 2);
    assert_eq!(partition.groups()[0].target, audit);
    assert_eq!(partition.groups()[0].num_channels(), 1);
    assert_eq!(partition.groups()[1].target, agg);
    assert_eq!(partition.groups()[1].num_channels(), 3);

    // Channel indices are unique across the whole partition.
    let channels: Vec<usize> = partition
        .groups()
        .iter()
        .flat_map(|g| graph.group_edges(g))
        .map(|e| e.channel.index)
        .collect();
    assert_eq!(channels, vec![0, 1, 2, 3]);
}

#[test]
fn test_duplicate_job_edge_reuses_group() {
    let mut job = JobGraph::new("dup");
    let a = job.add_vertex("a", 2);
    let b = job.add_vertex("b", 2);
    job.add_edge(a, b, ShipStrategy::Broadcast);
    job.add_edge(a, b, ShipStrategy::Broadcast);

    let graph = ExecutionGraph::build(&job).unwrap();
    for subtask in graph.subtasks(a) {
        let partition = graph.partition(subtask.produced_partition.unwrap()).unwrap();
        assert_eq!(partition.groups().len(), 1);
        assert_eq!(partition.groups()[0].num_channels(), 2);
    }
    assert_eq!(graph.edges().len(), 4);
}

#[test]
fn test_input_slots_follow_edge_order() {
    let mut job = JobGraph::new("join");
    let left = job.add_vertex("left", 1);
    let right = job.add_vertex("right", 1);
    let join = job.add_vertex("join", 2);
    job.add_edge(left, join, ShipStrategy::FieldsHash { key_position: 0 });
    job.add_edge(right, join, ShipStrategy::FieldsHash { key_position: 0 });

    let graph = ExecutionGraph::build(&job).unwrap();
    let join0 = ExecutionVertexId::new(join, 0);
    let slots: Vec<(JobVertexId, usize)> = graph
        .input_edges(join0)
        .iter()
        .map(|e| (e.partition.producer.job_vertex, e.input_slot))
        .collect();
    assert_eq!(slots, vec![(left, 0), (right, 1)]);
}

#[test]
fn test_pointwise_equal_parallelism() {
    let (job, producer, _) = two_vertex_job(3, 3, ShipStrategy::Pointwise);
    let graph = ExecutionGraph::build(&job).unwrap();

    for subtask in graph.subtasks(producer) {
        let partition = graph.partition(subtask.produced_partition.unwrap()).unwrap();
        let consumers: Vec<usize> = graph
            .group_edges(&partition.groups()[0])
            .map(|e| e.consumer.subtask_index)
            .collect();
        assert_eq!(consumers, vec![subtask.id.subtask_index]);
    }
}

#[test]
fn test_pointwise_links() {
    assert_eq!(
        subtask_links(DistributionPattern::Pointwise, 4, 2),
        vec![(0, 0..1), (1, 0..1), (2, 1..2), (3, 1..2)]
    );
    assert_eq!(
        subtask_links(DistributionPattern::Pointwise, 2, 4),
        vec![(0, 0..2), (1, 2..4)]
    );
    assert_eq!(
        subtask_links(DistributionPattern::Pointwise, 3, 4),
        vec![(0, 0..1), (1, 1..2), (2, 2..4)]
    );
}

#[test]
fn test_pointwise_covers_every_consumer_once_when_fanning_out() {
    for (p, c) in [(1, 5), (2, 7), (3, 9), (4, 6)] {
        let mut covered = vec![0; c];
        for (_, range) in subtask_links(DistributionPattern::Pointwise, p, c) {
            for i in range {
                covered[i] += 1;
            }
        }
        assert!(covered.iter().all(|n| *n == 1), "p={p} c={c}: {covered:?}");
    }
}

#[test]
fn test_build_rejects_unknown_vertex() {
    let mut job = JobGraph::new("broken");
    let a = job.add_vertex("a", 1);
    job.add_edge(a, JobVertexId(42), ShipStrategy::Broadcast);

    let err = ExecutionGraph::build(&job).unwrap_err();
    assert!(matches!(err, GraphError::GraphBuild { .. }), "{err:?}");
    assert!(err.to_string().contains("vertex_42"));
}

#[test]
fn test_build_rejects_zero_parallelism() {
    let mut job = JobGraph::new("broken");
    job.add_vertex("idle", 0);

    let err = ExecutionGraph::build(&job).unwrap_err();
    assert!(matches!(err, GraphError::GraphBuild { .. }));
}

#[test]
fn test_build_rejects_duplicate_vertex_ids() {
    let mut job = JobGraph::new("broken");
    job.vertices.push(JobVertex {
        id: JobVertexId(1),
        name: "a".into(),
        parallelism: 1,
    });
    job.vertices.push(JobVertex {
        id: JobVertexId(1),
        name: "b".into(),
        parallelism: 1,
    });

    assert!(matches!(
        ExecutionGraph::build(&job),
        Err(GraphError::GraphBuild { .. })
    ));
}

#[test]
fn test_manual_wiring_and_group_bounds() {
    let mut graph = ExecutionGraph::new("manual");
    graph
        .add_job_vertex(&JobVertex {
            id: JobVertexId(0),
            name: "p".into(),
            parallelism: 1,
        })
        .unwrap();
    graph
        .add_job_vertex(&JobVertex {
            id: JobVertexId(1),
            name: "c".into(),
            parallelism: 2,
        })
        .unwrap();

    let producer = ExecutionVertexId::new(JobVertexId(0), 0);
    assert_eq!(graph.vertex(producer).unwrap().produced_partition, None);
    let partition = graph.ensure_partition(producer).unwrap();
    assert_eq!(graph.ensure_partition(producer).unwrap(), partition);

    let group = graph
        .add_consumer_group(partition, JobVertexId(1), ShipStrategy::Broadcast)
        .unwrap();
    let edge = graph
        .add_consumer(partition, group, ExecutionVertexId::new(JobVertexId(1), 1), 0)
        .unwrap();
    assert_eq!(graph.edge(edge).unwrap().subpartition, 0);

    assert_eq!(
        graph.add_consumer(partition, 5, ExecutionVertexId::new(JobVertexId(1), 0), 0),
        Err(GraphError::IndexOutOfRange { index: 5, len: 1 })
    );
    // Group targets vertex 1; vertex 0 cannot join it.
    assert!(matches!(
        graph.add_consumer(partition, group, producer, 0),
        Err(GraphError::GraphBuild { .. })
    ));
}

#[test]
fn test_mutation_after_publish_is_rejected() {
    let (job, producer, consumer) = two_vertex_job(1, 1, ShipStrategy::Broadcast);
    let mut graph = ExecutionGraph::build(&job).unwrap();
    let partition = graph
        .vertex(ExecutionVertexId::new(producer, 0))
        .and_then(|v| v.produced_partition)
        .unwrap();

    graph.start_execution();
    assert!(graph.is_executing());
    assert_eq!(
        graph.add_consumer_group(partition, consumer, ShipStrategy::Forward),
        Err(GraphError::IllegalGraphMutation)
    );
    assert_eq!(
        graph.add_consumer(partition, 0, ExecutionVertexId::new(consumer, 0), 0),
        Err(GraphError::IllegalGraphMutation)
    );
    assert_eq!(
        graph.add_job_vertex(&JobVertex {
            id: JobVertexId(7),
            name: "late".into(),
            parallelism: 1,
        }),
        Err(GraphError::IllegalGraphMutation)
    );

    let published = graph.publish();
    assert_eq!(published.edges().len(), 1);
}
