use cake_engine::{CakeScheduler, CakeSettings, FlowKeys, NoopWatchdog, Packet};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

fn enqueue_dequeue(c: &mut Criterion) {
    c.bench_function("enqueue_dequeue_256_flows", |b| {
        let mut sched = CakeScheduler::new(CakeSettings::default(), Box::new(NoopWatchdog));
        let mut now = 0u64;
        let mut src = 0u32;
        b.iter(|| {
            src = (src + 1) & 0xff;
            now += 10_000;
            let pkt = Packet {
                len: 1500,
                truesize: 1564,
                dsfield: 0,
                keys: FlowKeys {
                    src,
                    dst: 0x0a00_0001,
                    ports: 0x0050_1f90,
                    proto: 6,
                },
                mark: src,
            };
            sched.enqueue(pkt, now);
            black_box(sched.dequeue(now));
        });
    });
}

criterion_group!(benches, enqueue_dequeue);
criterion_main!(benches);
