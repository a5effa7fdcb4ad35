use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use recast_core::audio::remix::Remix;
use std::hint::black_box;

/// One AAC packet worth of frames at 44.1 kHz
const FRAMES: usize = 1024;

fn pcm(channels: usize) -> Vec<i16> {
    (0..FRAMES * channels)
        .map(|i| ((i * 7919) % 65536) as i32 as i16)
        .collect()
}

fn bench_remix(c: &mut Criterion) {
    let mut group = c.benchmark_group("remix");
    group.throughput(Throughput::Elements(FRAMES as u64));

    for (name, remix, input_channels) in [
        ("pass_through", Remix::PassThrough, 2),
        ("up_mix", Remix::UpMix, 1),
        ("down_mix", Remix::DownMix, 2),
    ] {
        let input = pcm(input_channels);
        let mut output = vec![0i16; remix.output_len(input.len())];
        group.bench_with_input(BenchmarkId::from_parameter(name), &input, |b, input| {
            b.iter(|| remix.remix(black_box(input), black_box(&mut output)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_remix);
criterion_main!(benches);
