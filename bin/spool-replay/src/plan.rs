//! Arrival plans: how a file's blocks reach the buffer
//!
//! The file is cut into `block_size` chunks which are striped round-robin
//! across `streams` streams, the way parallel data channels split a
//! transfer. Each stream then reorders its chunks within windows of
//! `window` chunks to mimic uneven completion.

use bytes::Bytes;
use rand::Rng;
use rand::seq::SliceRandom;

/// One chunk as it arrives: offset in the transfer plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arrival {
    pub offset: u64,
    pub payload: Bytes,
}

/// Chunks delivered by one stream, in arrival order
pub type Stream = Vec<Arrival>;

/// Split `data` into striped, locally shuffled streams
pub fn striped<R: Rng + ?Sized>(
    data: &Bytes,
    block_size: usize,
    streams: usize,
    window: usize,
    rng: &mut R,
) -> Vec<Stream> {
    let streams = streams.max(1);
    let mut out: Vec<Stream> = vec![Vec::new(); streams];

    let mut offset = 0;
    let mut index = 0;
    while offset < data.len() {
        let end = (offset + block_size).min(data.len());
        out[index % streams].push(Arrival {
            offset: offset as u64,
            payload: data.slice(offset..end),
        });
        offset = end;
        index += 1;
    }

    if window > 1 {
        for stream in &mut out {
            for chunk in stream.chunks_mut(window) {
                chunk.shuffle(rng);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn reassemble(streams: &[Stream]) -> Vec<u8> {
        let mut all: Vec<&Arrival> = streams.iter().flatten().collect();
        all.sort_by_key(|a| a.offset);
        all.iter().flat_map(|a| a.payload.iter().copied()).collect()
    }

    #[test]
    fn test_striped_covers_every_byte_once() {
        let data = Bytes::from((0..=255u8).cycle().take(1000).collect::<Vec<_>>());
        let mut rng = StdRng::seed_from_u64(1);
        let streams = striped(&data, 64, 3, 4, &mut rng);

        assert_eq!(streams.len(), 3);
        assert_eq!(streams.iter().map(Vec::len).sum::<usize>(), 16);
        assert_eq!(reassemble(&streams), data.to_vec());
    }

    #[test]
    fn test_round_robin_without_window() {
        let data = Bytes::from_static(b"aabbccdde");
        let mut rng = StdRng::seed_from_u64(1);
        let streams = striped(&data, 2, 2, 1, &mut rng);

        let offsets: Vec<Vec<u64>> = streams
            .iter()
            .map(|s| s.iter().map(|a| a.offset).collect())
            .collect();
        assert_eq!(offsets, vec![vec![0, 4, 8], vec![2, 6]]);
        assert_eq!(streams[0][2].payload, Bytes::from_static(b"e"));
    }

    #[test]
    fn test_empty_input_has_no_arrivals() {
        let mut rng = StdRng::seed_from_u64(1);
        let streams = striped(&Bytes::new(), 8, 0, 4, &mut rng);
        assert_eq!(streams.len(), 1);
        assert!(streams[0].is_empty());
    }
}
