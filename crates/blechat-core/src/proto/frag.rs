//! 分片协议 - 固定 12 字节头 + 最多 100 字节负载
//!
//! 发送方向：
//! `seal 输出 -> make_chunks -> Fragment::serialize -> transport.send（每片一次）`
//!
//! 接收方向：
//! `transport 收帧 -> parse -> Reassembler::feed -> 拼出完整负载`
//!
//! # 头部格式（大端）
//!
//! | 字段     | 大小 | 说明                              |
//! | -------- | ---- | --------------------------------- |
//! | `ver`    | 1B   | 恒为 1                            |
//! | `flags`  | 1B   | bit0 = FINAL，bit1 = RETRANS 保留 |
//! | `msg_id` | 4B   | 每个发送方单调递增                |
//! | `seq`    | 2B   | 从 0 计数                         |
//! | `total`  | 2B   | 分片总数，>= 1                    |
//! | `len`    | 2B   | 头后负载字节数，0..=100           |

use std::collections::HashMap;

use super::ProtoError;

/// 协议版本号
pub const PROTO_VER: u8 = 1;
/// 本片是消息的最后一片
pub const FLAG_FINAL: u8 = 1 << 0;
/// 重传标记，保留：当前不设置也不检查
pub const FLAG_RETRANS: u8 = 1 << 1;
/// 头部字节数
pub const HDR_SIZE: usize = 12;
/// 单片最大负载
pub const MAX_PAYLOAD: usize = 100;

/// 线上分片头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub ver: u8,
    pub flags: u8,
    pub msg_id: u32,
    pub seq: u16,
    pub total: u16,
    pub len: u16,
}

impl Header {
    fn validate(&self) -> Result<(), ProtoError> {
        if self.ver != PROTO_VER
            || self.total == 0
            || self.seq >= self.total
            || usize::from(self.len) > MAX_PAYLOAD
        {
            return Err(ProtoError::MalformedHeader);
        }
        Ok(())
    }

    /// 校验并按网络字节序打包
    pub fn pack(&self) -> Result<[u8; HDR_SIZE], ProtoError> {
        self.validate()?;
        let mut out = [0u8; HDR_SIZE];
        out[0] = self.ver;
        out[1] = self.flags;
        out[2..6].copy_from_slice(&self.msg_id.to_be_bytes());
        out[6..8].copy_from_slice(&self.seq.to_be_bytes());
        out[8..10].copy_from_slice(&self.total.to_be_bytes());
        out[10..12].copy_from_slice(&self.len.to_be_bytes());
        Ok(out)
    }

    /// 解包并校验
    pub fn unpack(buf: &[u8; HDR_SIZE]) -> Result<Header, ProtoError> {
        let h = Header {
            ver: buf[0],
            flags: buf[1],
            msg_id: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
            seq: u16::from_be_bytes([buf[6], buf[7]]),
            total: u16::from_be_bytes([buf[8], buf[9]]),
            len: u16::from_be_bytes([buf[10], buf[11]]),
        };
        h.validate()?;
        Ok(h)
    }
}

/// 头 + 负载（拥有缓冲）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub hdr: Header,
    pub payload: Vec<u8>,
}

impl Fragment {
    /// 串接头和负载成线上帧
    pub fn serialize(&self) -> Result<Vec<u8>, ProtoError> {
        if self.payload.len() != usize::from(self.hdr.len) {
            return Err(ProtoError::SizeMismatch {
                expect: usize::from(self.hdr.len),
                got: self.payload.len(),
            });
        }
        let hdr = self.hdr.pack()?;
        let mut out = Vec::with_capacity(HDR_SIZE + self.payload.len());
        out.extend_from_slice(&hdr);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }
}

/// 把任意字节串切成有序分片
///
/// 空负载产生恰好一片 `total=1, seq=0, len=0, FINAL`；
/// 否则按 `mtu_payload` 切块，只有最后一片带 FINAL。
pub fn make_chunks(
    msg_id: u32,
    payload: &[u8],
    mtu_payload: usize,
) -> Result<Vec<Fragment>, ProtoError> {
    if mtu_payload == 0 || mtu_payload > MAX_PAYLOAD {
        return Err(ProtoError::BadMtu(mtu_payload));
    }

    if payload.is_empty() {
        return Ok(vec![Fragment {
            hdr: Header {
                ver: PROTO_VER,
                flags: FLAG_FINAL,
                msg_id,
                seq: 0,
                total: 1,
                len: 0,
            },
            payload: Vec::new(),
        }]);
    }

    let count = payload.len().div_ceil(mtu_payload);
    if count > usize::from(u16::MAX) {
        return Err(ProtoError::TooLarge(count));
    }

    let total = count as u16;
    let mut chunks = Vec::with_capacity(count);
    for (i, part) in payload.chunks(mtu_payload).enumerate() {
        let seq = i as u16;
        let flags = if seq == total - 1 { FLAG_FINAL } else { 0 };
        chunks.push(Fragment {
            hdr: Header {
                ver: PROTO_VER,
                flags,
                msg_id,
                seq,
                total,
                len: part.len() as u16,
            },
            payload: part.to_vec(),
        });
    }
    Ok(chunks)
}

/// 解析一帧：长度必须恰为 `12 + len`
pub fn parse(frame: &[u8]) -> Result<Fragment, ProtoError> {
    if frame.len() < HDR_SIZE {
        return Err(ProtoError::MalformedFragment);
    }
    let mut hdr_buf = [0u8; HDR_SIZE];
    hdr_buf.copy_from_slice(&frame[..HDR_SIZE]);
    let hdr = Header::unpack(&hdr_buf).map_err(|_| ProtoError::MalformedFragment)?;
    if frame.len() != HDR_SIZE + usize::from(hdr.len) {
        return Err(ProtoError::MalformedFragment);
    }
    Ok(Fragment {
        hdr,
        payload: frame[HDR_SIZE..].to_vec(),
    })
}

/// 按 `msg_id` 的重组状态
struct State {
    total: u16,
    received: usize,
    bytes: usize,
    parts: Vec<Vec<u8>>,
    have: Vec<bool>,
}

impl State {
    fn new(total: u16) -> Self {
        Self {
            total,
            received: 0,
            bytes: 0,
            parts: vec![Vec::new(); usize::from(total)],
            have: vec![false; usize::from(total)],
        }
    }
}

/// 接收侧重组器
///
/// 支持乱序到达；重复分片忽略（先到者生效）；同一 `msg_id` 的
/// 后续分片若声明了不同的 `total`，旧状态会被重建。
#[derive(Default)]
pub struct Reassembler {
    map: HashMap<u32, State>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 喂入一个分片，集齐时返回完整负载
    pub fn feed(&mut self, frag: &Fragment) -> Result<Option<Vec<u8>>, ProtoError> {
        let hdr = &frag.hdr;
        if hdr.total == 0 || hdr.seq >= hdr.total {
            return Err(ProtoError::MalformedFragment);
        }
        if frag.payload.len() != usize::from(hdr.len) {
            return Err(ProtoError::SizeMismatch {
                expect: usize::from(hdr.len),
                got: frag.payload.len(),
            });
        }

        let st = self
            .map
            .entry(hdr.msg_id)
            .or_insert_with(|| State::new(hdr.total));
        if st.total != hdr.total {
            // total 变了：发送方重启或 msg_id 撞号，丢弃旧进度
            log::warn!(
                "reassembler: msg_id={} total changed {} -> {}, resetting",
                hdr.msg_id,
                st.total,
                hdr.total
            );
            *st = State::new(hdr.total);
        }

        let idx = usize::from(hdr.seq);
        if st.have[idx] {
            return Ok(None); // 重复分片
        }
        st.have[idx] = true;
        st.received += 1;
        st.bytes += frag.payload.len();
        st.parts[idx] = frag.payload.clone();

        if st.received < usize::from(st.total) {
            return Ok(None);
        }

        let st = self.map.remove(&hdr.msg_id).expect("state exists");
        let mut full = Vec::with_capacity(st.bytes);
        for part in &st.parts {
            full.extend_from_slice(part);
        }
        Ok(Some(full))
    }

    /// 丢弃某条消息的未完成状态
    pub fn clear(&mut self, msg_id: u32) {
        self.map.remove(&msg_id);
    }

    /// 当前在途消息数
    pub fn pending(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        Header {
            ver: PROTO_VER,
            flags: FLAG_FINAL,
            msg_id: 0xDEAD_BEEF,
            seq: 2,
            total: 3,
            len: 42,
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let h = sample_header();
        let packed = h.pack().unwrap();
        assert_eq!(Header::unpack(&packed).unwrap(), h);
    }

    #[test]
    fn test_header_invariants() {
        let mut h = sample_header();
        h.ver = 2;
        assert_eq!(h.pack(), Err(ProtoError::MalformedHeader));

        let mut h = sample_header();
        h.total = 0;
        h.seq = 0;
        assert_eq!(h.pack(), Err(ProtoError::MalformedHeader));

        let mut h = sample_header();
        h.seq = h.total;
        assert_eq!(h.pack(), Err(ProtoError::MalformedHeader));

        let mut h = sample_header();
        h.len = (MAX_PAYLOAD + 1) as u16;
        assert_eq!(h.pack(), Err(ProtoError::MalformedHeader));
    }

    #[test]
    fn test_make_chunks_properties() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        for mtu in [1usize, 7, 32, 100] {
            let chunks = make_chunks(7, &payload, mtu).unwrap();
            assert_eq!(chunks.len(), payload.len().div_ceil(mtu));

            let mut rebuilt = Vec::new();
            for (i, c) in chunks.iter().enumerate() {
                assert_eq!(usize::from(c.hdr.seq), i);
                assert_eq!(usize::from(c.hdr.total), chunks.len());
                assert!(c.payload.len() <= mtu);
                let is_last = i == chunks.len() - 1;
                assert_eq!(c.hdr.flags & FLAG_FINAL != 0, is_last);
                rebuilt.extend_from_slice(&c.payload);
            }
            assert_eq!(rebuilt, payload);
        }
    }

    #[test]
    fn test_make_chunks_empty_payload() {
        let chunks = make_chunks(1, &[], 50).unwrap();
        assert_eq!(chunks.len(), 1);
        let c = &chunks[0];
        assert_eq!(c.hdr.total, 1);
        assert_eq!(c.hdr.seq, 0);
        assert_eq!(c.hdr.len, 0);
        assert_ne!(c.hdr.flags & FLAG_FINAL, 0);
        assert!(c.payload.is_empty());
    }

    #[test]
    fn test_make_chunks_bad_mtu() {
        assert_eq!(make_chunks(1, b"xy", 0), Err(ProtoError::BadMtu(0)));
        assert_eq!(make_chunks(1, b"xy", 101), Err(ProtoError::BadMtu(101)));
        // 空负载也不豁免 MTU 校验
        assert_eq!(make_chunks(1, &[], 0), Err(ProtoError::BadMtu(0)));
    }

    #[test]
    fn test_make_chunks_too_large() {
        let payload = vec![0u8; 65536 * 2];
        assert!(matches!(
            make_chunks(1, &payload, 1),
            Err(ProtoError::TooLarge(_))
        ));
    }

    #[test]
    fn test_serialize_parse_roundtrip() {
        let chunks = make_chunks(99, b"the quick brown fox", 8).unwrap();
        for c in &chunks {
            let frame = c.serialize().unwrap();
            assert_eq!(frame.len(), HDR_SIZE + c.payload.len());
            assert_eq!(&parse(&frame).unwrap(), c);
        }
    }

    #[test]
    fn test_serialize_len_mismatch() {
        let mut f = make_chunks(1, b"abcd", 100).unwrap().remove(0);
        f.payload.push(0);
        assert!(matches!(f.serialize(), Err(ProtoError::SizeMismatch { .. })));
    }

    #[test]
    fn test_parse_rejects_bad_frames() {
        // 不足 12 字节
        assert_eq!(parse(&[0u8; 11]), Err(ProtoError::MalformedFragment));
        // 声明的 len 与实际长度不符
        let mut frame = make_chunks(1, b"hello", 100).unwrap()[0]
            .serialize()
            .unwrap();
        frame.push(0xFF);
        assert_eq!(parse(&frame), Err(ProtoError::MalformedFragment));
    }

    #[test]
    fn test_reassembly_in_order() {
        let payload = b"0123456789abcdef".to_vec();
        let chunks = make_chunks(5, &payload, 4).unwrap();
        let mut rx = Reassembler::new();
        for (i, c) in chunks.iter().enumerate() {
            let out = rx.feed(c).unwrap();
            if i == chunks.len() - 1 {
                assert_eq!(out.unwrap(), payload);
            } else {
                assert!(out.is_none());
            }
        }
        assert_eq!(rx.pending(), 0);
    }

    #[test]
    fn test_reassembly_any_permutation() {
        let payload: Vec<u8> = (0u8..200).collect();
        let chunks = make_chunks(11, &payload, 50).unwrap();
        assert_eq!(chunks.len(), 4);

        // 所有 4! 排列都要能重组
        let mut order = [0usize, 1, 2, 3];
        permute(&mut order, 0, &mut |perm| {
            let mut rx = Reassembler::new();
            let mut done = None;
            for &i in perm {
                if let Some(full) = rx.feed(&chunks[i]).unwrap() {
                    done = Some(full);
                }
            }
            assert_eq!(done.unwrap(), payload);
        });
    }

    fn permute(arr: &mut [usize], k: usize, f: &mut impl FnMut(&[usize])) {
        if k == arr.len() {
            f(arr);
            return;
        }
        for i in k..arr.len() {
            arr.swap(k, i);
            permute(arr, k + 1, f);
            arr.swap(k, i);
        }
    }

    #[test]
    fn test_reassembly_out_of_order_duplicates() {
        // f0, f0, f2, f1：在 f1 处首次完成
        let payload: Vec<u8> = (0u8..30).collect();
        let chunks = make_chunks(3, &payload, 10).unwrap();
        let mut rx = Reassembler::new();
        assert!(rx.feed(&chunks[0]).unwrap().is_none());
        assert!(rx.feed(&chunks[0]).unwrap().is_none());
        assert!(rx.feed(&chunks[2]).unwrap().is_none());
        assert_eq!(rx.feed(&chunks[1]).unwrap().unwrap(), payload);
    }

    #[test]
    fn test_reassembly_duplicate_first_write_wins() {
        let chunks = make_chunks(8, b"aaaabbbb", 4).unwrap();
        let mut rx = Reassembler::new();
        assert!(rx.feed(&chunks[0]).unwrap().is_none());

        // 同 seq 不同内容：保留先到的
        let mut forged = chunks[0].clone();
        forged.payload = b"XXXX".to_vec();
        assert!(rx.feed(&forged).unwrap().is_none());
        assert_eq!(rx.feed(&chunks[1]).unwrap().unwrap(), b"aaaabbbb");
    }

    #[test]
    fn test_reassembly_total_change_resets() {
        let chunks_a = make_chunks(9, b"aaaabbbbcccc", 4).unwrap(); // total=3
        let chunks_b = make_chunks(9, b"ddddeeee", 4).unwrap(); // total=2
        let mut rx = Reassembler::new();
        assert!(rx.feed(&chunks_a[0]).unwrap().is_none());
        // 同 msg_id 换了 total：旧进度作废
        assert!(rx.feed(&chunks_b[0]).unwrap().is_none());
        assert_eq!(rx.feed(&chunks_b[1]).unwrap().unwrap(), b"ddddeeee");
    }

    #[test]
    fn test_reassembly_rejects_malformed() {
        let mut rx = Reassembler::new();
        let bad = Fragment {
            hdr: Header {
                ver: PROTO_VER,
                flags: 0,
                msg_id: 1,
                seq: 3,
                total: 3,
                len: 0,
            },
            payload: Vec::new(),
        };
        assert_eq!(rx.feed(&bad), Err(ProtoError::MalformedFragment));
    }

    #[test]
    fn test_clear_drops_partial_state() {
        let chunks = make_chunks(4, b"aaaabbbb", 4).unwrap();
        let mut rx = Reassembler::new();
        assert!(rx.feed(&chunks[0]).unwrap().is_none());
        rx.clear(4);
        assert_eq!(rx.pending(), 0);
        // 清掉后单独喂 f1 不会完成
        assert!(rx.feed(&chunks[1]).unwrap().is_none());
    }
}
