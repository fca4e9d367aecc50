use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use proptest::test_runner::Config;

use ctxbus_core::{Context, ContextFilter};
use ctxbus_runtime::{BusConfig, ContextBus, ContextHandler};
use ctxbus_test::{BusFuzzer, BusOp, FuzzerConfig};

fn op_strategy() -> impl Strategy<Value = BusOp> {
    prop_oneof![
        (0usize..4, 0usize..3).prop_map(|(app, channel)| BusOp::Join { app, channel }),
        (0usize..4).prop_map(|app| BusOp::Leave { app }),
        (0usize..4, proptest::option::of(0usize..3))
            .prop_map(|(app, context_type)| BusOp::Listen { app, context_type }),
        (0usize..16).prop_map(|listener| BusOp::Unsubscribe { listener }),
        (0usize..4, 0usize..3).prop_map(|(app, context_type)| BusOp::Broadcast { app, context_type }),
        (0usize..4, 0usize..3, 0usize..3).prop_map(|(app, channel, context_type)| BusOp::BroadcastOn {
            app,
            channel,
            context_type
        }),
    ]
}

proptest! {
    #![proptest_config(Config::with_cases(128))]

    #[test]
    fn bus_matches_reference_model(ops in proptest::collection::vec(op_strategy(), 1..80)) {
        let mut fuzzer = BusFuzzer::new(FuzzerConfig::default()).unwrap();
        let result = fuzzer.run_ops(&ops).unwrap();
        prop_assert!(result.passed(), "violations: {:?}", result.violations);
    }

    #[test]
    fn cache_keeps_only_latest_per_type(tickers in proptest::collection::vec("[A-Z]{1,5}", 1..10)) {
        let bus = ContextBus::new(BusConfig::default()).unwrap();
        let a = bus.connect("A");
        let b = bus.connect("B");
        let red = bus.system_channels()[0].id.clone();

        bus.join(b, &red).unwrap();
        for ticker in &tickers {
            let ctx = Context::new("fdc3.instrument").with("id", serde_json::json!({ "ticker": ticker }));
            bus.broadcast(b, ctx).unwrap();
        }

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let handler: ContextHandler = Arc::new(move |ctx: &Context| sink.lock().push(ctx.clone()));
        bus.add_listener(a, ContextFilter::of_type("fdc3.instrument"), handler).unwrap();
        bus.join(a, &red).unwrap();

        let received = received.lock();
        prop_assert_eq!(received.len(), 1);
        let last = tickers.last().unwrap();
        prop_assert_eq!(
            received[0].id().and_then(|id| id.get("ticker")).and_then(|t| t.as_str()),
            Some(last.as_str())
        );
    }
}

#[test]
fn heavy_fuzz_over_seeds() {
    for seed in [1, 7, 1234] {
        let mut fuzzer = BusFuzzer::new(FuzzerConfig::heavy().with_seed(seed)).unwrap();
        let result = fuzzer.run().unwrap();
        assert!(result.passed(), "seed {}: {:?}", seed, result.violations);
        assert!(result.deliveries > 0);
    }
}
