#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use av_frame_pump::{OutputFormat, TransformConfig, from_reader};
use criterion::{Criterion, criterion_group, criterion_main};
use std::{hint::black_box, io::Cursor};

const WIDTH: usize = 352;
const HEIGHT: usize = 240;
const FRAMECOUNT: usize = 30;

fn y4m_stream() -> Vec<u8> {
    let mut out = Vec::new();
    let mut encoder = y4m::encode(WIDTH, HEIGHT, y4m::Ratio::new(30000, 1001))
        .with_colorspace(y4m::Colorspace::C420jpeg)
        .write_header(&mut out)
        .unwrap();
    let chroma = vec![128u8; (WIDTH / 2) * (HEIGHT / 2)];
    for i in 0..FRAMECOUNT {
        let luma: Vec<u8> = (0..WIDTH * HEIGHT).map(|p| ((p + i) % 220 + 16) as u8).collect();
        encoder
            .write_frame(&y4m::Frame::new([&luma[..], &chroma[..], &chroma[..]], None))
            .unwrap();
    }
    drop(encoder);
    out
}

fn pump_benchmark(c: &mut Criterion, name: &str, config: TransformConfig) {
    let data = y4m_stream();
    c.bench_function(name, |b| {
        b.iter_batched(
            || from_reader(Cursor::new(black_box(data.clone())), &config).unwrap(),
            |mut pump| {
                let mut picture = av_frame_pump::Picture::new();
                let mut frames = 0;
                while pump.next_frame_into(&mut picture) {
                    frames += 1;
                }
                assert_eq!(frames, FRAMECOUNT);
            },
            criterion::BatchSize::PerIteration,
        )
    });
}

fn gray_benchmark(c: &mut Criterion) {
    pump_benchmark(c, "y4m pump gray8", TransformConfig::new(OutputFormat::Gray8));
}

fn bgr_benchmark(c: &mut Criterion) {
    pump_benchmark(c, "y4m pump bgr24", TransformConfig::new(OutputFormat::Bgr24));
}

fn bgr_scaled_benchmark(c: &mut Criterion) {
    pump_benchmark(
        c,
        "y4m pump bgr24 scaled",
        TransformConfig::new(OutputFormat::Bgr24).with_size(640, 480),
    );
}

criterion_group!(benches, gray_benchmark, bgr_benchmark, bgr_scaled_benchmark);
criterion_main!(benches);
