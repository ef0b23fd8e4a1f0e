//! Dictionary actor, timer and fan-out helper on a real worker pool

mod common;

use common::{eventually, probed_system};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use troupe::utils::{for_each_then, Dictionary, DictionaryActor, Timer};
use troupe::{Actor, Callback};

const TIMEOUT: Duration = Duration::from_secs(10);

/// Collects answers from the dictionary
#[derive(Default)]
struct Reader {
    counts: Vec<usize>,
    found: Vec<Option<u32>>,
    ticks: u32,
}

impl Actor for Reader {}

#[test]
fn test_dictionary_answers_on_reader_queue() {
    let (system, probe) = probed_system();
    let dictionary = system
        .wrap_actor::<Dictionary<String, u32>, _>(DictionaryActor::new)
        .unwrap();
    let reader = system.spawn(Reader::default);

    for (i, name) in ["alpha", "beta", "gamma"].into_iter().enumerate() {
        dictionary.insert(name.to_string(), i as u32).unwrap();
    }
    dictionary.remove("beta".to_string()).unwrap();

    dictionary
        .count(reader.bind(|r: &mut Reader, count: usize| r.counts.push(count)))
        .unwrap();
    let record = reader.bind(|r: &mut Reader, value: Option<u32>| r.found.push(value));
    dictionary.try_get_value("gamma".to_string(), record.clone()).unwrap();
    dictionary.try_get_value("beta".to_string(), record).unwrap();

    assert!(probe.wait_idle(TIMEOUT));
    let (counts, found) = reader
        .ask(|r| (r.counts.clone(), r.found.clone()))
        .unwrap()
        .wait_timeout(TIMEOUT)
        .unwrap();
    assert_eq!(counts, vec![2]);
    assert_eq!(found, vec![Some(2), None]);
}

#[test]
fn test_dictionary_transaction_and_missing_key_fault() {
    let (system, probe) = probed_system();
    let dictionary = system
        .wrap_actor::<Dictionary<u32, String>, _>(DictionaryActor::new)
        .unwrap();

    dictionary
        .atomically(|map: &mut HashMap<u32, String>| {
            for i in 0..5 {
                map.insert(i, format!("v{}", i));
            }
            map.retain(|k, _| k % 2 == 0);
        })
        .unwrap();

    let called = Arc::new(AtomicBool::new(false));
    let flag = called.clone();
    dictionary
        .get_value(
            7,
            Callback::new(move |_value: String| flag.store(true, Ordering::SeqCst)),
        )
        .unwrap();

    let (tx, rx) = crossbeam_channel::bounded(1);
    dictionary
        .keys(Callback::new(move |mut keys: Vec<u32>| {
            keys.sort_unstable();
            let _ = tx.send(keys);
        }))
        .unwrap();

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), vec![0, 2, 4]);
    assert!(probe.wait_idle(TIMEOUT));
    assert!(!called.load(Ordering::SeqCst));
    let faults = probe.faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].site.method, "get_value");
}

#[test]
fn test_for_each_then_over_actor_replies() {
    let (system, probe) = probed_system();
    let dictionary = system
        .wrap_actor::<Dictionary<u32, u32>, _>(DictionaryActor::new)
        .unwrap();
    for i in 0..10 {
        dictionary.insert(i, i * i).unwrap();
    }

    let sums = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let collected = sums.clone();
    let (tx, rx) = crossbeam_channel::bounded(1);

    for_each_then(
        0..10u32,
        |key, done| {
            let collected = collected.clone();
            dictionary
                .get_value(
                    key,
                    Callback::new(move |value: u32| {
                        collected.lock().push(value);
                        let _held = &done;
                    }),
                )
                .unwrap();
        },
        move || {
            let _ = tx.send(());
        },
    );

    rx.recv_timeout(TIMEOUT).unwrap();
    assert!(probe.wait_idle(TIMEOUT));
    let mut values = sums.lock().clone();
    values.sort_unstable();
    assert_eq!(values, (0..10).map(|i| i * i).collect::<Vec<u32>>());
}

#[test]
fn test_timer_ticks_land_on_actor_queue() {
    let (system, _probe) = probed_system();
    let reader = system.spawn(Reader::default);

    let tick = reader.bind(|r: &mut Reader, _: ()| r.ticks += 1);
    let mut timer = Timer::start(&system, Duration::from_millis(10), true, tick).unwrap();

    assert!(eventually(TIMEOUT, || {
        reader
            .ask(|r| r.ticks)
            .ok()
            .and_then(|reply| reply.wait_timeout(TIMEOUT).ok())
            .is_some_and(|ticks| ticks >= 3)
    }));
    timer.stop();
    assert!(!timer.is_running());
}
