//! Ordering, exclusion and queue lifecycle through a worker pool

mod common;

use common::{eventually, probed_system};
use crossbeam_channel::{unbounded, Sender};
use proptest::prelude::*;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use troupe::{
    Actor, ActorError, ActorFuture, ActorInterface, ActorSystem, Args, Dispatch, Executor,
    InvocationDescriptor, MethodSignature, Result, Task,
};

const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Clone, PartialEq)]
struct Store {
    value: i64,
}

impl Actor for Store {}

impl Store {
    fn set_value(&mut self, mut args: Args) -> Result<()> {
        self.value = args.take(0)?;
        Ok(())
    }

    fn add(&mut self, mut args: Args) -> Result<()> {
        let delta: i64 = args.take(0)?;
        self.value += delta;
        Ok(())
    }

    fn check_value(&mut self, mut args: Args) -> Result<()> {
        let expected: i64 = args.take(0)?;
        if self.value == expected {
            Ok(())
        } else {
            Err(ActorError::invocation(
                "check_value",
                format!("expected {}, found {}", expected, self.value),
            ))
        }
    }

    fn get_value(&mut self, _args: Args) -> Result<i64> {
        Ok(self.value)
    }

    fn positive_value(&mut self, _args: Args) -> Result<i64> {
        if self.value > 0 {
            Ok(self.value)
        } else {
            Err(ActorError::invocation("positive_value", "value is not positive"))
        }
    }
}

static SET_VALUE: InvocationDescriptor<Store> = InvocationDescriptor::action("set_value", Store::set_value);
static ADD: InvocationDescriptor<Store> = InvocationDescriptor::action("add", Store::add);
static CHECK_VALUE: InvocationDescriptor<Store> =
    InvocationDescriptor::action("check_value", Store::check_value);
static GET_VALUE: InvocationDescriptor<Store, i64> =
    InvocationDescriptor::returning("get_value", Store::get_value);
static POSITIVE_VALUE: InvocationDescriptor<Store, i64> =
    InvocationDescriptor::returning("positive_value", Store::positive_value);

struct StoreProxy {
    dispatch: Dispatch<Store>,
}

impl StoreProxy {
    fn set_value(&self, value: i64) -> Result<()> {
        self.dispatch.invoke(&SET_VALUE, Args::new().value(value))
    }

    fn add(&self, delta: i64) -> Result<()> {
        self.dispatch.invoke(&ADD, Args::new().value(delta))
    }

    fn check_value(&self, expected: i64) -> Result<()> {
        self.dispatch.invoke(&CHECK_VALUE, Args::new().value(expected))
    }

    fn get_value(&self) -> Result<ActorFuture<i64>> {
        self.dispatch.invoke_returning(&GET_VALUE, Args::new())
    }

    fn positive_value(&self) -> Result<ActorFuture<i64>> {
        self.dispatch.invoke_returning(&POSITIVE_VALUE, Args::new())
    }
}

impl ActorInterface for StoreProxy {
    type Target = Store;

    fn signatures() -> Vec<MethodSignature> {
        vec![
            SET_VALUE.signature(),
            ADD.signature(),
            CHECK_VALUE.signature(),
            GET_VALUE.signature(),
            POSITIVE_VALUE.signature(),
        ]
    }

    fn from_dispatch(dispatch: Dispatch<Store>) -> Self {
        Self { dispatch }
    }
}

#[test]
fn test_failed_returning_method_abandons_reply() {
    let (system, probe) = probed_system();
    let store = system.wrap_actor::<StoreProxy, _>(Store::default).unwrap();

    let reply = store.positive_value().unwrap();
    assert!(matches!(
        reply.wait_timeout(TIMEOUT),
        Err(ActorError::Abandoned { .. })
    ));

    assert!(probe.wait_idle(TIMEOUT));
    let faults = probe.faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].site.method, "positive_value");

    store.set_value(3).unwrap();
    assert_eq!(store.positive_value().unwrap().wait_timeout(TIMEOUT).unwrap(), 3);
}

#[test]
fn test_fifo_per_caller() {
    let (system, probe) = probed_system();
    let store = system.wrap_actor::<StoreProxy, _>(Store::default).unwrap();

    for i in 0..100 {
        store.set_value(i).unwrap();
        store.check_value(i).unwrap();
    }

    assert!(probe.wait_idle(TIMEOUT));
    assert!(probe.faults().is_empty(), "out of order: {:?}", probe.faults());
    assert_eq!(store.get_value().unwrap().wait_timeout(TIMEOUT).unwrap(), 99);
}

#[derive(Debug, Clone)]
enum Op {
    Set(i64),
    Add(i64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (-1000i64..1000).prop_map(Op::Set),
        (-50i64..50).prop_map(Op::Add),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_calls_apply_in_caller_order(ops in prop::collection::vec(op(), 1..60)) {
        let (system, probe) = probed_system();
        let store = system.wrap_actor::<StoreProxy, _>(Store::default).unwrap();

        let mut model = 0i64;
        for op in &ops {
            match op {
                Op::Set(v) => {
                    model = *v;
                    store.set_value(*v).unwrap();
                }
                Op::Add(d) => {
                    model += *d;
                    store.add(*d).unwrap();
                }
            }
            store.check_value(model).unwrap();
        }

        prop_assert!(probe.wait_idle(TIMEOUT));
        prop_assert!(probe.faults().is_empty());
        prop_assert_eq!(store.get_value().unwrap().wait_timeout(TIMEOUT).unwrap(), model);
    }
}

struct Occupancy {
    inside: Arc<AtomicI32>,
    max_seen: i32,
}

impl Actor for Occupancy {}

#[test]
fn test_mutual_exclusion_across_callers() {
    let (system, probe) = probed_system();
    let inside = Arc::new(AtomicI32::new(0));
    let shared = inside.clone();
    let occupancy = system.spawn(move || Occupancy {
        inside: shared,
        max_seen: 0,
    });

    let callers: Vec<_> = (0..4)
        .map(|_| {
            let occupancy = occupancy.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    occupancy
                        .send(|o| {
                            let now = o.inside.fetch_add(1, Ordering::SeqCst) + 1;
                            o.max_seen = o.max_seen.max(now);
                            thread::sleep(Duration::from_micros(200));
                            o.inside.fetch_sub(1, Ordering::SeqCst);
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for caller in callers {
        caller.join().unwrap();
    }

    assert!(probe.wait_idle(TIMEOUT));
    let max_seen = occupancy.ask(|o| o.max_seen).unwrap().wait_timeout(TIMEOUT).unwrap();
    assert_eq!(max_seen, 1);
    assert_eq!(inside.load(Ordering::SeqCst), 0);
}

#[test]
fn test_queue_reclaimed_and_recreated() {
    let (system, probe) = probed_system();
    let store = system.adopt(Store::default());
    let scheduler = system.scheduler().clone();

    store.send(|s| s.value = 1).unwrap();
    assert!(probe.wait_idle(TIMEOUT));
    assert!(eventually(TIMEOUT, || !scheduler.has_queue(store.id())));
    let created = system.stats().queues_created;

    store.send(|s| s.value += 1).unwrap();
    assert!(probe.wait_idle(TIMEOUT));
    assert!(eventually(TIMEOUT, || !scheduler.has_queue(store.id())));

    let stats = system.stats();
    assert_eq!(stats.queues_created, created + 1);
    assert_eq!(stats.queues_retired, stats.queues_created);
    assert_eq!(store.ask(|s| s.value).unwrap().wait_timeout(TIMEOUT).unwrap(), 2);
}

#[test]
fn test_wrapped_existing_matches_direct_calls() {
    let (system, probe) = probed_system();
    let mut direct = Store { value: 7 };
    let wrapped = system.wrap_existing::<StoreProxy>(direct.clone()).unwrap();

    for (i, delta) in [3i64, -10, 42, 0, 5].into_iter().enumerate() {
        if i % 2 == 0 {
            Store::add(&mut direct, Args::new().value(delta)).unwrap();
            wrapped.add(delta).unwrap();
        } else {
            Store::set_value(&mut direct, Args::new().value(delta)).unwrap();
            wrapped.set_value(delta).unwrap();
        }
    }

    assert!(probe.wait_idle(TIMEOUT));
    let value = wrapped.get_value().unwrap().wait_timeout(TIMEOUT).unwrap();
    assert_eq!(value, direct.value);
}

/// Runs every task on one dedicated thread
struct DedicatedThread {
    tasks: Sender<Task>,
}

impl DedicatedThread {
    fn start(name: &str) -> Arc<Self> {
        let (tasks, queue) = unbounded::<Task>();
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for task in queue {
                    task();
                }
            })
            .unwrap();
        Arc::new(Self { tasks })
    }
}

impl Executor for DedicatedThread {
    fn execute(&self, task: Task) {
        let _ = self.tasks.send(task);
    }

    fn name(&self) -> &str {
        "dedicated-thread"
    }
}

#[test]
fn test_external_executor_runs_construction_and_calls() {
    let (system, probe) = probed_system();
    let executor = DedicatedThread::start("ui-thread");

    let store = system
        .wrap_actor_on::<StoreProxy, _>(executor, || {
            let built_on = thread::current().name().map(str::to_string);
            Store {
                value: if built_on.as_deref() == Some("ui-thread") { 1 } else { -1 },
            }
        })
        .unwrap();

    let handle = store.dispatch.handle().unwrap().clone();
    let ran_on = handle
        .ask(|_| thread::current().name().map(str::to_string))
        .unwrap()
        .wait_timeout(TIMEOUT)
        .unwrap();

    assert!(probe.wait_idle(TIMEOUT));
    assert_eq!(ran_on.as_deref(), Some("ui-thread"));
    assert_eq!(store.get_value().unwrap().wait_timeout(TIMEOUT).unwrap(), 1);
    assert!(system.stats().external_dispatches >= 1);
}

#[test]
fn test_value_shaped_interface_is_rejected() {
    static PEEK: InvocationDescriptor<Store, i64> = InvocationDescriptor::value("peek", Store::get_value);

    struct PeekProxy {
        dispatch: Dispatch<Store>,
    }

    impl PeekProxy {
        fn peek(&self) -> Result<i64> {
            self.dispatch.invoke_value(&PEEK, Args::new())
        }
    }

    impl ActorInterface for PeekProxy {
        type Target = Store;

        fn signatures() -> Vec<MethodSignature> {
            vec![SET_VALUE.signature(), PEEK.signature()]
        }

        fn from_dispatch(dispatch: Dispatch<Store>) -> Self {
            Self { dispatch }
        }
    }

    let system = ActorSystem::new().unwrap();
    let err = system.wrap_actor::<PeekProxy, _>(Store::default).err().unwrap();
    assert!(matches!(err, ActorError::Protocol { .. }));

    // Audiences run inline, so a synchronous value is fine there
    let audience = system.wrap_audience::<PeekProxy>(Store { value: 12 });
    assert_eq!(audience.peek().unwrap(), 12);
}
