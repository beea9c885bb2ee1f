use capsule_crypto::{
    content_hash, decrypt_blob, encrypt_blob, signing_payload, AeadAlgorithm, Ed25519Signer,
    ManifestSigner, MasterKey,
};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_content_hash(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| content_hash(divan::black_box(&data)));
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_encrypt_blob(bencher: divan::Bencher, size: usize) {
    let master = MasterKey::from_bytes([0xABu8; 32]);
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            encrypt_blob(
                divan::black_box(&master),
                AeadAlgorithm::XChaCha20Poly1305,
                divan::black_box(&data),
            )
            .unwrap()
        });
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_decrypt_blob(bencher: divan::Bencher, size: usize) {
    let master = MasterKey::from_bytes([0xABu8; 32]);
    let data = make_data(size);
    let sealed = encrypt_blob(&master, AeadAlgorithm::XChaCha20Poly1305, &data).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            decrypt_blob(
                divan::black_box(&master),
                AeadAlgorithm::XChaCha20Poly1305,
                &sealed.nonce,
                divan::black_box(&sealed.ciphertext),
            )
            .unwrap()
        });
}

#[divan::bench(args = [10, 100, 1000])]
fn bench_sign_manifest(bencher: divan::Bencher, blobs: usize) {
    let signer = Ed25519Signer::generate();
    let entries: Vec<_> = (0..blobs)
        .map(|i| {
            let hash = content_hash(&i.to_le_bytes());
            serde_json::json!({"blob_id": hash, "hash": hash, "size_bytes": i})
        })
        .collect();
    let manifest = serde_json::json!({"capsule_id": "bench", "blobs": entries, "signature": {}});
    bencher.bench(|| {
        let payload = signing_payload(divan::black_box(&manifest)).unwrap();
        signer.sign_payload(&payload).unwrap()
    });
}

fn main() {
    divan::main();
}
