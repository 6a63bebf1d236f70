//! 附近节点目录
//!
//! central 扫描过程中观察到的同服务设备缓存，只活在进程内。
//! 条目超过 TTL（120 秒）不再上报；RSSI 未知（记 0）的条目默认隐藏。

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// 条目存活时间
pub const PEER_TTL_MS: u64 = 120_000;

/// 对外上报的节点信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// 冒号分隔的大写 MAC
    pub address: String,
    /// 0 = 未知
    pub rssi: i16,
    /// 距最近一次观察的毫秒数
    pub age_ms: u64,
}

struct Entry {
    rssi: i16,
    last_seen_ms: u64,
}

/// 节点目录（central 状态机持有）
pub struct PeerDirectory {
    epoch: Instant,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for PeerDirectory {
    fn default() -> Self {
        Self {
            epoch: Instant::now(),
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// 记录一次观察；RSSI 未知传 0
    pub fn observe(&self, address: String, rssi: i16) {
        self.observe_at(address, rssi, self.now_ms());
    }

    fn observe_at(&self, address: String, rssi: i16, now_ms: u64) {
        let mut entries = self.entries.lock().expect("peer lock poisoned");
        let e = entries.entry(address).or_insert(Entry {
            rssi: 0,
            last_seen_ms: now_ms,
        });
        e.last_seen_ms = now_ms;
        // RSSI 未知时保留上次的读数
        if rssi != 0 {
            e.rssi = rssi;
        }
    }

    /// 取当前可上报的节点，按 RSSI 降序
    pub fn snapshot(&self, keep_zero_rssi: bool) -> Vec<PeerInfo> {
        self.snapshot_at(keep_zero_rssi, self.now_ms())
    }

    fn snapshot_at(&self, keep_zero_rssi: bool, now_ms: u64) -> Vec<PeerInfo> {
        let mut entries = self.entries.lock().expect("peer lock poisoned");
        entries.retain(|_, e| now_ms.saturating_sub(e.last_seen_ms) < PEER_TTL_MS);

        let mut out: Vec<PeerInfo> = entries
            .iter()
            .filter(|(_, e)| keep_zero_rssi || e.rssi != 0)
            .map(|(addr, e)| PeerInfo {
                address: addr.clone(),
                rssi: e.rssi,
                age_ms: now_ms.saturating_sub(e.last_seen_ms),
            })
            .collect();
        out.sort_by(|a, b| b.rssi.cmp(&a.rssi).then_with(|| a.address.cmp(&b.address)));
        out
    }

    pub fn clear(&self) {
        self.entries.lock().expect("peer lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_and_snapshot() {
        let dir = PeerDirectory::new();
        dir.observe_at("AA:BB:CC:DD:EE:FF".into(), -40, 0);
        dir.observe_at("11:22:33:44:55:66".into(), -70, 100);

        let peers = dir.snapshot_at(false, 200);
        assert_eq!(peers.len(), 2);
        // RSSI 降序：-40 在前
        assert_eq!(peers[0].address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(peers[0].age_ms, 200);
        assert_eq!(peers[1].age_ms, 100);
    }

    #[test]
    fn test_zero_rssi_hidden_by_default() {
        let dir = PeerDirectory::new();
        dir.observe_at("AA:BB:CC:DD:EE:FF".into(), 0, 0);
        assert!(dir.snapshot_at(false, 0).is_empty());
        assert_eq!(dir.snapshot_at(true, 0).len(), 1);
    }

    #[test]
    fn test_unknown_rssi_keeps_last_reading() {
        let dir = PeerDirectory::new();
        dir.observe_at("AA:BB:CC:DD:EE:FF".into(), -55, 0);
        dir.observe_at("AA:BB:CC:DD:EE:FF".into(), 0, 100);
        let peers = dir.snapshot_at(false, 100);
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].rssi, -55);
        assert_eq!(peers[0].age_ms, 0);
    }

    #[test]
    fn test_ttl_expiry() {
        let dir = PeerDirectory::new();
        dir.observe_at("AA:BB:CC:DD:EE:FF".into(), -50, 0);
        assert_eq!(dir.snapshot_at(false, PEER_TTL_MS - 1).len(), 1);
        assert!(dir.snapshot_at(false, PEER_TTL_MS).is_empty());
        // 过期条目已被真正移除
        assert!(dir.snapshot_at(true, PEER_TTL_MS).is_empty());
    }
}
