//! 回环传输
//!
//! 单线程同步回显：`send` 直接在调用线程上回调 `on_frame`。
//! 整条加密-分片-重组管线的属性测试都跑在它上面。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{OnFrame, Settings};

#[derive(Default)]
pub struct LoopbackTransport {
    started: AtomicBool,
    mtu_payload: AtomicUsize,
    on_frame: Mutex<Option<OnFrame>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, settings: Settings, on_frame: OnFrame) -> anyhow::Result<()> {
        if self.started.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.mtu_payload.store(settings.mtu_payload, Ordering::SeqCst);
        *self.on_frame.lock().expect("loopback lock poisoned") = Some(on_frame);
        self.started.store(true, Ordering::SeqCst);
        log::debug!("loopback started (mtu_payload={})", settings.mtu_payload);
        Ok(())
    }

    pub fn send(&self, frame: &[u8]) -> bool {
        if !self.started.load(Ordering::SeqCst) {
            return false;
        }
        let mtu = self.mtu_payload.load(Ordering::SeqCst);
        if mtu != 0 && frame.len() > mtu {
            log::warn!("loopback: frame len={} exceeds mtu_payload={}", frame.len(), mtu);
            return false;
        }
        let cb = self
            .on_frame
            .lock()
            .expect("loopback lock poisoned")
            .clone();
        match cb {
            Some(cb) => {
                cb(frame);
                true
            }
            None => false,
        }
    }

    pub fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        *self.on_frame.lock().expect("loopback lock poisoned") = None;
    }

    pub fn link_ready(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}
