use console_bridge::demux::{encode_frame, DemuxError, StreamDemux, StreamKind};
use proptest::prelude::*;
use proptest::test_runner::Config;

fn stream_kind() -> impl Strategy<Value = StreamKind> {
    prop_oneof![
        Just(StreamKind::Stdin),
        Just(StreamKind::Stdout),
        Just(StreamKind::Stderr),
    ]
}

fn decode_in_chunks(bytes: &[u8], cuts: &[usize]) -> Result<(Vec<u8>, Vec<u8>), DemuxError> {
    let mut demux = StreamDemux::new();
    let mut start = 0;
    for &cut in cuts {
        let end = (start + cut).min(bytes.len());
        demux.push(&bytes[start..end])?;
        start = end;
    }
    demux.push(&bytes[start..])?;
    let output = demux.finish()?;
    Ok((output.stdout.into_bytes(), output.stderr.into_bytes()))
}

proptest! {
    #![proptest_config(Config::with_cases(256))]
    #[test]
    fn chunking_never_changes_the_partition(
        frames in prop::collection::vec(
            (stream_kind(), prop::collection::vec(b'a'..=b'z', 0..40)),
            0..12,
        ),
        cuts in prop::collection::vec(0usize..24, 0..32),
    ) {
        let mut wire = Vec::new();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        for (kind, payload) in &frames {
            wire.extend_from_slice(&encode_frame(*kind, payload));
            match kind {
                StreamKind::Stdout => stdout.extend_from_slice(payload),
                _ => stderr.extend_from_slice(payload),
            }
        }

        let (got_stdout, got_stderr) = decode_in_chunks(&wire, &cuts).expect("decode");
        prop_assert_eq!(got_stdout, stdout);
        prop_assert_eq!(got_stderr, stderr);
    }
}

#[test]
fn stdout_frame_split_five_three_two_rest() {
    let payload = b"0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060";
    let frame = encode_frame(StreamKind::Stdout, payload);

    let mut demux = StreamDemux::new();
    assert_eq!(demux.push(&frame[..5]).unwrap(), 0);
    assert_eq!(demux.push(&frame[5..8]).unwrap(), 0);
    assert_eq!(demux.push(&frame[8..10]).unwrap(), 0);
    assert_eq!(demux.push(&frame[10..]).unwrap(), 1);

    let output = demux.finish().unwrap();
    assert!(!output.has_error());
    assert_eq!(output.data().as_bytes(), payload);
}

#[test]
fn byte_at_a_time_delivery() {
    let mut wire = Vec::new();
    wire.extend_from_slice(&encode_frame(StreamKind::Stdout, b"true"));
    wire.extend_from_slice(&encode_frame(StreamKind::Stdout, b""));
    wire.extend_from_slice(&encode_frame(StreamKind::Stdout, b"\n"));

    let mut demux = StreamDemux::new();
    let completed: usize = wire.iter().map(|b| demux.push(&[*b]).unwrap()).sum();
    assert_eq!(completed, 3);
    assert_eq!(demux.finish().unwrap().stdout, "true\n");
}
