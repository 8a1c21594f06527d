use super::*;
use crate::error::RoutingError;
use crate::network::{GateOutput, InputChannelGate};
use crate::runtime::{BroadcastSelector, CancellationToken, FieldsHashSelector, ForwardSelector};

fn producer() -> ExecutionVertexId {
    ExecutionVertexId::new(JobVertexId(0), 0)
}

/// One single-channel input gate per consumer subtask of `target`.
fn consumers<T>(
    target: JobVertexId,
    parallelism: usize,
) -> (Vec<InputChannelGate<T>>, Vec<ChannelWriter<T>>) {
    let mut gates = Vec::new();
    let mut writers = Vec::new();
    for subtask in 0..parallelism {
        let (gate, mut w) = InputChannelGate::new(ExecutionVertexId::new(target, subtask), 1);
        gates.push(gate);
        writers.append(&mut w);
    }
    (gates, writers)
}

fn drain<T>(gate: &InputChannelGate<T>) -> Vec<StreamElement<T>> {
    let cancel = CancellationToken::new();
    let mut out = Vec::new();
    while let GateOutput::Element { element, .. } = gate.next(&cancel).unwrap() {
        out.push(element);
    }
    out
}

#[test]
fn test_output_gate_broadcast_group() {
    let (gates, writers) = consumers::<i32>(JobVertexId(1), 3);
    let mut gate = OutputChannelGate::new(producer());
    gate.add_group(GroupOutput::new(
        JobVertexId(1),
        Box::new(BroadcastSelector),
        writers,
    ));
    assert_eq!(gate.num_channels(), 3);

    gate.emit_value(7).unwrap();
    gate.emit_value(8).unwrap();
    gate.close();

    for consumer in &gates {
        assert_eq!(
            drain(consumer),
            vec![StreamElement::record(7), StreamElement::record(8)]
        );
    }
}

#[test]
fn test_output_gate_routes_through_every_group() {
    let (broadcast_gates, broadcast_writers) = consumers::<(String, i32)>(JobVertexId(1), 2);
    let (hash_gates, hash_writers) = consumers::<(String, i32)>(JobVertexId(2), 4);

    let mut gate = OutputChannelGate::new(producer());
    assert_eq!(
        gate.add_group(GroupOutput::new(
            JobVertexId(1),
            Box::new(BroadcastSelector),
            broadcast_writers,
        )),
        0
    );
    assert_eq!(
        gate.add_group(GroupOutput::new(
            JobVertexId(2),
            Box::new(FieldsHashSelector::new(0)),
            hash_writers,
        )),
        1
    );
    assert_eq!(gate.num_groups(), 2);
    assert_eq!(gate.groups()[1].target(), JobVertexId(2));

    let keys = ["a", "b", "c", "a", "b"];
    for (i, key) in keys.iter().enumerate() {
        gate.emit_value((key.to_string(), i as i32)).unwrap();
    }
    gate.close();

    for consumer in &broadcast_gates {
        assert_eq!(drain(consumer).len(), keys.len());
    }

    // Each key lands on exactly one hash consumer, and all copies together.
    let selector = FieldsHashSelector::new(0);
    let mut total = 0;
    for (subtask, consumer) in hash_gates.iter().enumerate() {
        for element in drain(consumer) {
            let value = element.into_value().unwrap();
            let expected = selector.partition_tag(&value).unwrap() % 4;
            assert_eq!(expected as usize, subtask);
            total += 1;
        }
    }
    assert_eq!(total, keys.len());
}

#[test]
fn test_routing_error_sends_nothing() {
    let (broadcast_gates, broadcast_writers) = consumers::<i32>(JobVertexId(1), 1);
    let (_forward_gates, forward_writers) = consumers::<i32>(JobVertexId(2), 2);

    let mut gate = OutputChannelGate::new(producer());
    gate.add_group(GroupOutput::new(
        JobVertexId(1),
        Box::new(BroadcastSelector),
        broadcast_writers,
    ));
    gate.add_group(GroupOutput::new(
        JobVertexId(2),
        Box::new(ForwardSelector),
        forward_writers,
    ));

    assert_eq!(
        gate.emit_value(1),
        Err(GateError::Routing(RoutingError::MissingPartitionTag))
    );
    assert_eq!(broadcast_gates[0].buffered(), 0);

    gate.emit(StreamRecord::new(2).tagged(1)).unwrap();
    assert_eq!(broadcast_gates[0].buffered(), 1);
    gate.close();
}

#[test]
fn test_watermark_reaches_all_channels() {
    let (hash_gates, hash_writers) = consumers::<(u64, u64)>(JobVertexId(1), 3);
    let mut gate = OutputChannelGate::new(producer());
    gate.add_group(GroupOutput::new(
        JobVertexId(1),
        Box::new(FieldsHashSelector::new(1)),
        hash_writers,
    ));

    gate.emit_element(StreamElement::watermark(1000)).unwrap();
    gate.close();

    for consumer in &hash_gates {
        assert_eq!(drain(consumer), vec![StreamElement::watermark(1000)]);
    }
}

#[test]
fn test_gate_without_groups_discards() {
    let mut gate = OutputChannelGate::<i32>::new(producer());
    assert_eq!(gate.num_channels(), 0);
    gate.emit_value(1).unwrap();
    gate.emit_watermark(5).unwrap();
    gate.close();
}

#[test]
fn test_emit_after_consumer_dropped() {
    let (gates, writers) = consumers::<i32>(JobVertexId(1), 1);
    let mut gate = OutputChannelGate::new(producer());
    gate.add_group(GroupOutput::new(
        JobVertexId(1),
        Box::new(BroadcastSelector),
        writers,
    ));
    drop(gates);

    assert_eq!(
        gate.emit_value(1),
        Err(GateError::ReceiverDropped { channel: 0 })
    );
    gate.close();
}

#[test]
fn test_dropped_consumer_does_not_starve_the_rest() {
    let (mut gates, writers) = consumers::<i32>(JobVertexId(1), 3);
    let mut gate = OutputChannelGate::new(producer());
    gate.add_group(GroupOutput::new(
        JobVertexId(1),
        Box::new(BroadcastSelector),
        writers,
    ));
    drop(gates.remove(1));

    assert_eq!(
        gate.emit_value(5),
        Err(GateError::ReceiverDropped { channel: 0 })
    );
    gate.close();
    assert_eq!(drain(&gates[0]), vec![StreamElement::record(5)]);
    assert_eq!(drain(&gates[1]), vec![StreamElement::record(5)]);
}
