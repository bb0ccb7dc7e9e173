use criterion::{black_box, criterion_group, criterion_main, Criterion};
use duolink::peer::message::{AppMessage, FileOffer};
use duolink::peer::packet::Packet;
use duolink::peer::DEFAULT_CHUNK_SIZE;
use mls_crypto::{GroupSession, MlsSession};

fn chunk() -> AppMessage {
    AppMessage::FileChunk {
        request_id: 42,
        data: vec![0xab; DEFAULT_CHUNK_SIZE],
    }
}

fn app_message_benchmark(c: &mut Criterion) {
    let chunk = chunk();
    let encoded = chunk.encode().unwrap();
    c.bench_function("encode_file_chunk", |b| b.iter(|| black_box(&chunk).encode()));
    c.bench_function("decode_file_chunk", |b| {
        b.iter(|| AppMessage::decode(black_box(&encoded)))
    });

    let offer = AppMessage::FileOffer(FileOffer {
        id: 7,
        name: "holiday-photos.zip".to_string(),
        size: 512 * 1024 * 1024,
        preview: Some("data:image/png;base64,iVBORw0KGgo=".to_string()),
    });
    let encoded_offer = offer.encode().unwrap();
    c.bench_function("decode_file_offer", |b| {
        b.iter(|| AppMessage::decode(black_box(&encoded_offer)))
    });
}

fn packet_benchmark(c: &mut Criterion) {
    let frame = Packet::sealed(vec![0u8; DEFAULT_CHUNK_SIZE + 256]).encode();
    c.bench_function("decode_sealed_packet", |b| {
        b.iter(|| Packet::decode(black_box(&frame)))
    });
}

/// Sealing and opening one full chunk with an established two-party group.
fn seal_chunk_benchmark(c: &mut Criterion) {
    let mut initiator = MlsSession::new().unwrap();
    let mut responder = MlsSession::new().unwrap();
    initiator.create_group().unwrap();
    let key_package = responder.key_package().unwrap();
    let welcome = initiator.add_member(&key_package).unwrap();
    responder.join_group(&welcome).unwrap();

    let plaintext = chunk().encode().unwrap();
    c.bench_function("seal_and_open_chunk", |b| {
        b.iter(|| {
            let sealed = initiator.encrypt(black_box(&plaintext)).unwrap();
            responder.decrypt(&sealed).unwrap()
        })
    });
}

criterion_group!(
    benches,
    app_message_benchmark,
    packet_benchmark,
    seal_chunk_benchmark
);
criterion_main!(benches);
