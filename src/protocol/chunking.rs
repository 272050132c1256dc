use bytes::{Bytes, BytesMut};

/// Splits `data` into `chunk_size` pieces. A length that is an exact multiple
/// of the chunk size (zero included) ends with an empty chunk, so the last
/// chunk is always shorter than `chunk_size`.
pub fn split(data: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    let chunk_size = chunk_size.max(1);
    let mut chunks: Vec<Bytes> = (0..data.len())
        .step_by(chunk_size)
        .map(|start| data.slice(start..(start + chunk_size).min(data.len())))
        .collect();
    if data.len() % chunk_size == 0 {
        chunks.push(Bytes::new());
    }
    chunks
}

pub fn reassemble<I: IntoIterator<Item = Bytes>>(chunks: I) -> Bytes {
    let mut file = BytesMut::new();
    for chunk in chunks {
        file.extend_from_slice(&chunk);
    }
    file.freeze()
}
