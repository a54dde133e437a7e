//! Stream conversion throughput: SSE decoding and the UI data-stream encoder.

use axonhub::codec::sse::SseDecoder;
use axonhub::stream::{collect, Converter, VecStream};
use axonhub::transformer::data_stream::DataStreamEncoder;
use axonhub::types::{Delta, Response};
use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

const SSE_FRAMES: &[&str] = &[
    r#"data: {"id":"chatcmpl-123","object":"chat.completion.chunk","created":1694268190,"model":"gpt-4o","choices":[{"index":0,"delta":{"role":"assistant","content":""},"finish_reason":null}]}"#,
    r#"data: {"id":"chatcmpl-123","object":"chat.completion.chunk","created":1694268190,"model":"gpt-4o","choices":[{"index":0,"delta":{"content":"Hello"},"finish_reason":null}]}"#,
    r#"data: {"id":"chatcmpl-123","object":"chat.completion.chunk","created":1694268190,"model":"gpt-4o","choices":[{"index":0,"delta":{"content":" there"},"finish_reason":null}]}"#,
    r#"data: {"id":"chatcmpl-123","object":"chat.completion.chunk","created":1694268190,"model":"gpt-4o","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
    "data: [DONE]",
];

fn sse_body(repeat: usize) -> Vec<Bytes> {
    let mut out = Vec::new();
    for _ in 0..repeat {
        for frame in SSE_FRAMES {
            out.push(Bytes::from(format!("{frame}\n\n")));
        }
    }
    out
}

fn unified_chunks(n: usize) -> Vec<Response> {
    let mut chunks = Vec::with_capacity(n + 2);
    chunks.push(Response::chunk("c1", "gpt-4o").with_delta(Delta::reasoning("thinking")));
    for i in 0..n {
        chunks.push(Response::chunk("c1", "gpt-4o").with_delta(Delta::text(format!("tok{i} "))));
    }
    chunks.push(Response::chunk("c1", "gpt-4o").with_finish_reason("stop"));
    chunks
}

fn bench_sse_decoding(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    let body = sse_body(50);
    let bytes: usize = body.iter().map(|b| b.len()).sum();

    let mut group = c.benchmark_group("sse_decoding");
    group.throughput(Throughput::Bytes(bytes as u64));
    group.bench_function("decode_250_frames", |b| {
        b.iter(|| {
            let source = Box::new(VecStream::new(body.clone()));
            let events = rt
                .block_on(collect(SseDecoder::boxed(source)))
                .expect("decode");
            black_box(events.len())
        })
    });
    group.finish();
}

fn bench_data_stream_encoder(c: &mut Criterion) {
    let chunks = unified_chunks(200);

    let mut group = c.benchmark_group("data_stream_encoder");
    group.throughput(Throughput::Elements(chunks.len() as u64));
    group.bench_function("encode_200_text_deltas", |b| {
        b.iter(|| {
            let mut encoder = DataStreamEncoder::new();
            let mut emitted = 0;
            for chunk in chunks.iter().cloned() {
                emitted += encoder.convert(chunk).expect("convert").len();
            }
            emitted += encoder.finish().expect("finish").len();
            black_box(emitted)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_sse_decoding, bench_data_stream_encoder);
criterion_main!(benches);
