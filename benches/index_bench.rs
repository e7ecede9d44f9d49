use criterion::{criterion_group, criterion_main, Criterion};
use faultline_core::catalog::FaultCatalog;
use faultline_core::context::{ContextRegistry, RequestOrigin};
use faultline_core::dei::ExecutionIndexer;
use faultline_core::time::VectorClock;
use faultline_core::types::{RequestId, StoragePolicy};

const ANALYSIS: &str = r#"{
  "grpc.exceptions": { "pattern": "(.*Service/.*)", "exceptions": [{ "name": "StatusRuntimeException" }] },
  "redis.byzantine": { "pattern": "RedisStringCommands.get", "byzantines": [{ "type": "string", "value": null }] },
  "kafka.exceptions": { "pattern": "KafkaProducer.send", "exceptions": [{ "name": "TimeoutException" }] }
}"#;

fn index_benchmarks(c: &mut Criterion) {
    let mut origin = VectorClock::new();
    origin.increment("gateway");
    origin.increment("frontend");

    for digest in [true, false] {
        let name = if digest { "index_for_digested" } else { "index_for_raw" };
        let indexer = ExecutionIndexer::new(digest);
        let registry = ContextRegistry::new(StoragePolicy::PerRequest);
        let request = RequestId::new();
        registry
            .begin(request, RequestOrigin::new("frontend").with_origin_clock(origin.clone()))
            .unwrap();

        c.bench_function(name, |b| {
            b.iter(|| {
                let index = indexer
                    .index_for(&registry, request, "users.UserService/GetUser", None)
                    .unwrap();
                indexer.pop(&registry, request, &index).unwrap();
            })
        });
    }
}

fn catalog_benchmarks(c: &mut Criterion) {
    let catalog = FaultCatalog::from_json_str(ANALYSIS).unwrap();

    c.bench_function("catalog_match_hit", |b| {
        b.iter(|| catalog.match_method("io.lettuce.core.api.sync.RedisStringCommands.get"))
    });

    c.bench_function("catalog_match_miss", |b| {
        b.iter(|| catalog.match_method("java.net.http.HttpClient.send"))
    });
}

criterion_group!(benches, index_benchmarks, catalog_benchmarks);
criterion_main!(benches);
