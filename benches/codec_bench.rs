use criterion::{Criterion, black_box, criterion_group, criterion_main};

use streamsend::protocol::{
    FILE_SIZE_FIELD, NAME_LEN_FIELD, decode_file_size, decode_filename, decode_name_len,
    encode_header,
};

fn bench_header_roundtrip(c: &mut Criterion) {
    let filename = "quarterly-report-final-v2.pdf";
    let file_size = 48 * 1024 * 1024u64;

    c.bench_function("header_roundtrip", |b| {
        b.iter(|| {
            let header = encode_header(black_box(filename), black_box(file_size)).unwrap();
            let name_len = decode_name_len(&header[..NAME_LEN_FIELD]).unwrap();
            let name_end = NAME_LEN_FIELD + name_len;
            let name = decode_filename(&header[NAME_LEN_FIELD..name_end], name_len).unwrap();
            let size = decode_file_size(&header[name_end..name_end + FILE_SIZE_FIELD]).unwrap();
            black_box((name, size))
        })
    });
}

fn bench_header_encode(c: &mut Criterion) {
    c.bench_function("header_encode", |b| {
        b.iter(|| encode_header(black_box("report.pdf"), black_box(1_048_576)).unwrap())
    });
}

criterion_group!(benches, bench_header_roundtrip, bench_header_encode);
criterion_main!(benches);
