// 테스트용 최소 H.264 스트림: 16x16 baseline, I_PCM 매크로블록 1개 (전부 0x80)

/// SPS + PPS (Annex B)
pub(crate) const H264_CONFIG: &[u8] = &[
    0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x0a, 0xda, 0x79, //
    0x00, 0x00, 0x00, 0x01, 0x68, 0xce, 0x38, 0x80,
];

/// IDR 슬라이스 (Annex B)
pub(crate) fn h264_idr() -> Vec<u8> {
    let mut nal = vec![0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x86, 0x80];
    nal.extend(std::iter::repeat(0x80).take(384)); // 256 luma + 128 chroma
    nal.push(0x80); // rbsp trailing bits
    nal
}
