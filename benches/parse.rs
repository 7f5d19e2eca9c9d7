/// Parser throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use feed_ingest::{Parser, Record, Slot, SpscRing, StatCounters};

fn record_buffer(count: usize) -> Vec<u8> {
    let mut buf = vec![0u8; count * Record::SIZE];
    for (i, chunk) in buf.chunks_mut(Record::SIZE).enumerate() {
        Record::new(i as u64 + 1, 100.0 + i as f64 * 0.01, 5).write_to(chunk);
    }
    buf
}

fn bench_parse_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_throughput");

    for msg_count in [1_000usize, 10_000, 100_000].iter() {
        let buffer = black_box(record_buffer(*msg_count));
        let ring = SpscRing::new((2 * msg_count).next_power_of_two() as u64);
        let counters = StatCounters::default();
        let mut scratch = vec![Slot::default(); 4096];

        group.bench_with_input(BenchmarkId::from_parameter(msg_count), msg_count, |b, _| {
            let mut parser = Parser::new();
            b.iter(|| {
                parser.feed(&buffer, &ring, &counters).unwrap();
                let mut drained = 0;
                loop {
                    let n = ring.try_pop_bulk(&mut scratch);
                    if n == 0 {
                        break;
                    }
                    drained += n;
                }
                drained
            })
        });
    }
    group.finish();
}

fn bench_parse_chunked(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_chunked");

    // MTU-sized chunks leave a partial record at almost every boundary
    let buffer = black_box(record_buffer(10_000));
    let ring = SpscRing::new(32_768);
    let counters = StatCounters::default();
    let mut scratch = vec![Slot::default(); 4096];

    for chunk_size in [1472usize, 4096, 65_536].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(chunk_size),
            chunk_size,
            |b, &chunk_size| {
                let mut parser = Parser::new();
                b.iter(|| {
                    for chunk in buffer.chunks(chunk_size) {
                        parser.feed(chunk, &ring, &counters).unwrap();
                    }
                    loop {
                        if ring.try_pop_bulk(&mut scratch) == 0 {
                            break;
                        }
                    }
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_parse_throughput, bench_parse_chunked);
criterion_main!(benches);
