use symphonia_codec_wma::WmaDecoder;
use symphonia_core::audio::{AudioBufferRef, Channels, Signal};
use symphonia_core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_WMA};
use symphonia_core::errors::Error;
use symphonia_core::formats::Packet;

fn make_channels(count: u32) -> Option<Channels> {
    match count {
        1 => Some(Channels::FRONT_LEFT),
        2 => Some(Channels::FRONT_LEFT | Channels::FRONT_RIGHT),
        3 => Some(Channels::FRONT_LEFT | Channels::FRONT_RIGHT | Channels::FRONT_CENTRE),
        _ => None,
    }
}

fn params(sample_rate: u32, channels: u32, extra_data: Option<&[u8]>) -> CodecParameters {
    let mut params = CodecParameters::new();
    params.for_codec(CODEC_TYPE_WMA).with_sample_rate(sample_rate);
    params.channels = make_channels(channels);
    params.extra_data = extra_data.map(|d| d.to_vec().into_boxed_slice());
    params
}

#[test]
fn invalid_codec_type() {
    let mut params = CodecParameters::new();
    params.with_sample_rate(44100);

    let err = WmaDecoder::try_new(&params, &DecoderOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
}

#[test]
fn invalid_sample_rate() {
    let params = params(96000, 2, None);

    let err = WmaDecoder::try_new(&params, &DecoderOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
}

#[test]
fn invalid_channel_count() {
    let params = params(44100, 3, None);

    let err = WmaDecoder::try_new(&params, &DecoderOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
}

#[test]
fn invalid_version() {
    let err = WmaDecoder::try_new_with_params(3, 44100, 2, 128000, 2230, None).unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
}

#[test]
fn invalid_block_align() {
    let err = WmaDecoder::try_new_with_params(2, 44100, 2, 128000, 65536, None).unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
}

#[test]
fn garbage_packets_do_not_panic() {
    // A v2 stream with Huffman exponents and the bit reservoir.
    let extra = [0u8, 0, 0, 0, 0x03, 0x00, 0, 0, 0, 0];

    let mut decoder =
        WmaDecoder::try_new_with_params(2, 44100, 2, 128000, 128, Some(&extra)).unwrap();

    for seed in 0u32..64 {
        let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
        let data: Vec<u8> = (0..128)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 24) as u8
            })
            .collect();

        let packet = Packet::new_from_slice(0, 0, 0, &data);

        // Malformed packets must fail or decode cleanly, never panic, and must not poison the
        // decoder for later packets.
        let _ = decoder.decode(&packet);
    }
}

#[test]
fn empty_packet_is_rejected() {
    let extra = [0u8, 0, 0, 0, 0x01, 0x00, 0, 0, 0, 0];

    let mut decoder =
        WmaDecoder::try_new_with_params(2, 22050, 1, 24000, 256, Some(&extra)).unwrap();

    let packet = Packet::new_from_slice(0, 0, 0, &[]);
    assert!(decoder.decode(&packet).is_err());
}

#[test]
fn trait_constructor_adopts_packet_size() {
    // Without container facts the decoder still comes up; the packet size is learned from the
    // first packet.
    let extra = [0u8, 0, 0, 0, 0x01, 0x00, 0, 0, 0, 0];
    let params = params(22050, 1, Some(&extra));

    let mut decoder = WmaDecoder::try_new(&params, &DecoderOptions::default()).unwrap();

    // An all-zero packet: channel 0 not coded, so the frame is silence.
    let packet = Packet::new_from_slice(0, 0, 0, &[0u8; 256]);

    let audio = decoder.decode(&packet).expect("an uncoded frame decodes");

    match audio {
        AudioBufferRef::S16(buf) => {
            assert_eq!(buf.frames(), 1024);
            assert!(buf.chan(0).iter().all(|&s| s == 0));
        }
        _ => panic!("unexpected sample format"),
    }
}
