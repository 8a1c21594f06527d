use super::*;
use crate::graph::{ExecutionVertexId, JobVertexId};
use crossbeam_channel::unbounded;
use std::thread;

fn gate_id() -> GateId {
    ExecutionVertexId::new(JobVertexId(3), 1)
}

fn value(output: GateOutput<i32>) -> (usize, i32) {
    match output {
        GateOutput::Element {
            channel,
            element: StreamElement::Record(rec),
        } => (channel, rec.value),
        other => panic!("expected record, got {other:?}"),
    }
}

#[test]
fn test_input_gate_single_channel() {
    let cancel = CancellationToken::new();
    let (gate, mut writers) = InputChannelGate::<i32>::new(gate_id(), 1);

    writers[0].send(StreamElement::record(42)).unwrap();
    writers[0].close();

    assert_eq!(value(gate.next(&cancel).unwrap()), (0, 42));
    assert_eq!(gate.next(&cancel).unwrap(), GateOutput::EndOfStream);
    assert_eq!(gate.num_closed(), 1);
}

#[test]
fn test_arrival_order_across_channels() {
    let cancel = CancellationToken::new();
    let (gate, writers) = InputChannelGate::<i32>::new(gate_id(), 3);

    writers[2].send(StreamElement::record(1)).unwrap();
    writers[0].send(StreamElement::record(2)).unwrap();
    writers[2].send(StreamElement::record(3)).unwrap();
    writers[1].send(StreamElement::record(4)).unwrap();

    let got: Vec<(usize, i32)> = (0..4).map(|_| value(gate.next(&cancel).unwrap())).collect();
    assert_eq!(got, vec![(2, 1), (0, 2), (2, 3), (1, 4)]);
}

#[test]
fn test_fifo_within_channel_under_concurrency() {
    let cancel = CancellationToken::new();
    let (gate, writers) = InputChannelGate::<i32>::new(gate_id(), 2);

    let handles: Vec<_> = writers
        .into_iter()
        .map(|mut writer| {
            thread::spawn(move || {
                for i in 0..500 {
                    writer.send(StreamElement::record(i)).unwrap();
                }
                writer.close();
            })
        })
        .collect();

    let mut last = [-1i32; 2];
    let mut count = 0;
    loop {
        match gate.next(&cancel).unwrap() {
            GateOutput::EndOfStream => break,
            output => {
                let (channel, v) = value(output);
                assert!(v > last[channel], "channel {channel} reordered");
                last[channel] = v;
                count += 1;
            }
        }
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(count, 1000);
    assert_eq!(last, [499, 499]);
}

#[test]
fn test_end_of_stream_requires_all_channels() {
    let (gate, mut writers) = InputChannelGate::<i32>::new(gate_id(), 2);

    writers[1].send(StreamElement::record(1)).unwrap();
    writers[0].close();
    assert_eq!(value(gate.try_next().unwrap().unwrap()), (1, 1));
    assert_eq!(gate.try_next().unwrap(), None);

    writers[1].close();
    assert_eq!(gate.try_next().unwrap(), Some(GateOutput::EndOfStream));
    // Stays at end of stream.
    assert_eq!(gate.try_next().unwrap(), Some(GateOutput::EndOfStream));
}

#[test]
fn test_listener_notified_once_per_transition() {
    let (gate, writers) = InputChannelGate::<i32>::new(gate_id(), 2);
    let (tx, rx) = unbounded();
    gate.register_listener(tx).unwrap();

    writers[0].send(StreamElement::record(1)).unwrap();
    writers[0].send(StreamElement::record(2)).unwrap();
    writers[1].send(StreamElement::record(3)).unwrap();

    let events: Vec<GateEvent> = rx.try_iter().collect();
    assert_eq!(
        events,
        vec![
            GateEvent::ChannelAvailable {
                gate: gate_id(),
                channel: 0
            },
            GateEvent::ChannelAvailable {
                gate: gate_id(),
                channel: 1
            },
        ]
    );

    // Drain channel 0 fully, then a new arrival is a new transition.
    gate.try_next().unwrap();
    writers[0].send(StreamElement::record(4)).unwrap();
    assert!(rx.try_recv().is_err(), "channel 0 was never drained");
    gate.try_next().unwrap();
    gate.try_next().unwrap();
    gate.try_next().unwrap();
    writers[0].send(StreamElement::record(5)).unwrap();
    assert_eq!(
        rx.try_recv().unwrap(),
        GateEvent::ChannelAvailable {
            gate: gate_id(),
            channel: 0
        }
    );
}

#[test]
fn test_listener_announces_existing_data_and_close() {
    let (gate, mut writers) = InputChannelGate::<i32>::new(gate_id(), 2);
    writers[1].send(StreamElement::record(9)).unwrap();

    let (tx, rx) = unbounded();
    gate.register_listener(tx).unwrap();
    assert_eq!(
        rx.try_recv().unwrap(),
        GateEvent::ChannelAvailable {
            gate: gate_id(),
            channel: 1
        }
    );

    writers[0].close();
    assert_eq!(
        rx.try_recv().unwrap(),
        GateEvent::ChannelClosed {
            gate: gate_id(),
            channel: 0
        }
    );
    drop(writers);
}

#[test]
fn test_second_listener_rejected() {
    let (gate, _writers) = InputChannelGate::<i32>::new(gate_id(), 1);
    let (tx, _rx) = unbounded();
    gate.register_listener(tx.clone()).unwrap();
    assert_eq!(
        gate.register_listener(tx),
        Err(GateError::ListenerAlreadyRegistered)
    );
}

#[test]
fn test_read_error_does_not_close_siblings() {
    let cancel = CancellationToken::new();
    let (gate, mut writers) = InputChannelGate::<i32>::new(gate_id(), 2);

    writers[0].fail("connection reset").unwrap();
    writers[1].send(StreamElement::record(7)).unwrap();

    assert_eq!(
        gate.next(&cancel),
        Err(GateError::ChannelRead {
            channel: 0,
            reason: "connection reset".to_string()
        })
    );
    assert_eq!(value(gate.next(&cancel).unwrap()), (1, 7));
    assert_eq!(gate.channel_state(1), Some(ChannelState::Empty));

    // The failed channel can still deliver and close normally.
    writers[0].send(StreamElement::record(8)).unwrap();
    assert_eq!(value(gate.next(&cancel).unwrap()), (0, 8));
    for writer in writers.iter_mut() {
        writer.close();
    }
    assert_eq!(gate.next(&cancel).unwrap(), GateOutput::EndOfStream);
}

#[test]
fn test_next_blocks_until_data_arrives() {
    let cancel = CancellationToken::new();
    let (gate, mut writers) = InputChannelGate::<i32>::new(gate_id(), 1);
    let mut writer = writers.pop().unwrap();

    let producer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        writer.send(StreamElement::record(11)).unwrap();
        writer.close();
    });

    assert_eq!(value(gate.next(&cancel).unwrap()), (0, 11));
    assert_eq!(gate.next(&cancel).unwrap(), GateOutput::EndOfStream);
    producer.join().unwrap();
}

#[test]
fn test_cancel_interrupts_blocked_next() {
    let cancel = CancellationToken::new();
    let (gate, _writers) = InputChannelGate::<i32>::new(gate_id(), 1);

    let canceller = cancel.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        canceller.cancel();
    });

    let start = Instant::now();
    assert_eq!(gate.next(&cancel), Err(GateError::TaskCancelled));
    assert!(start.elapsed() < Duration::from_secs(5));
    handle.join().unwrap();
}

#[test]
fn test_next_timeout() {
    let cancel = CancellationToken::new();
    let (gate, writers) = InputChannelGate::<i32>::new(gate_id(), 1);

    let timed = gate.next_timeout(&cancel, Duration::from_millis(5)).unwrap();
    assert!(timed.is_none());

    writers[0].send(StreamElement::watermark(100)).unwrap();
    let got = gate.next_timeout(&cancel, Duration::from_millis(50)).unwrap();
    assert_eq!(
        got,
        Some(GateOutput::Element {
            channel: 0,
            element: StreamElement::watermark(100)
        })
    );
}

#[test]
fn test_empty_gate_is_immediately_finished() {
    let cancel = CancellationToken::new();
    let (gate, writers) = InputChannelGate::<i32>::new(gate_id(), 0);
    assert!(writers.is_empty());
    assert_eq!(gate.next(&cancel).unwrap(), GateOutput::EndOfStream);
}
