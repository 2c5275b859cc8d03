//! Protocol encoding/framing benchmarks.

use bfmc_protocol::{build_frame, decode_frame, ControlPoint, Encoder, StreamFramer};
use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// A serial capture with `frames` telemetry frames and some boot noise in between.
fn create_capture(frames: usize) -> Vec<u8> {
    let mut data = Vec::new();
    for i in 0..frames {
        if i % 8 == 0 {
            data.extend_from_slice(b"boot: imu ok\r\n");
        }
        data.extend_from_slice(format!("@ENPB:{}.{:02};;\r\n", i % 400, i % 100).as_bytes());
    }
    data
}

fn bench_command_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_encode");
    group.throughput(Throughput::Elements(1));

    group.bench_function("move", |b| {
        b.iter(|| black_box(Encoder::encode_move(black_box(12.34), black_box(-5.0)).unwrap()));
    });

    group.bench_function("pid_gains", |b| {
        b.iter(|| {
            black_box(Encoder::encode_pid_gains(0.115, 0.81, 0.000222, 0.04).unwrap())
        });
    });

    let points = [
        ControlPoint::complex(0.0, 0.0),
        ControlPoint::complex(1.0, 0.5),
        ControlPoint::complex(2.0, 0.5),
        ControlPoint::complex(3.0, 0.0),
    ];
    group.bench_function("spline", |b| {
        b.iter(|| black_box(Encoder::encode_spline(&points, 3.0, true).unwrap()));
    });

    group.finish();
}

fn bench_stream_framer(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_framer");

    for frames in [10, 100, 1000] {
        let capture = create_capture(frames);

        group.throughput(Throughput::Bytes(capture.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(frames), &capture, |b, capture| {
            b.iter(|| {
                let mut framer = StreamFramer::new();
                black_box(framer.extend(capture))
            });
        });
    }

    group.finish();
}

fn bench_spi_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("spi_build");

    for size in [1, 7, 64, 1022] {
        let payload = vec![0x5Au8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| black_box(build_frame(5, payload).unwrap()));
        });
    }

    group.finish();
}

fn bench_spi_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("spi_decode");

    for size in [1, 7, 64, 1022] {
        let encoded = build_frame(5, &vec![0x5Au8; size]).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut buf = BytesMut::from(&encoded[..]);
                black_box(decode_frame(&mut buf).unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_command_encode,
    bench_stream_framer,
    bench_spi_build,
    bench_spi_decode,
);

criterion_main!(benches);
