//! Peripheral 角色引擎 - GATT 服务导出与 LE 广播
//!
//! 启动顺序（任一步失败整个 start 失败）：
//! 1. 打开 BlueZ 会话，取适配器并上电
//! 2. 注册 GATT 应用：主服务 + TX 特征（notify）+ RX 特征
//!    （write / write-without-response）
//! 3. 注册 LE 广播（type=peripheral，携带服务 UUID 与 LocalName，
//!    不含发射功率）
//!
//! # 收发路径
//!
//! - central 对 RX 特征 WriteValue：非零 offset 拒绝，负载直接交给
//!   接收回调
//! - central 对 TX 特征 StartNotify：bluer 把 notifier 交给我们，
//!   `notifying` 置位；之后 `send` 经该 notifier 推送
//!   （线上表现为 TX 对象的 PropertiesChanged Value 信号）
//! - `link_ready()` 即 `notifying`

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use bluer::adv::{Advertisement, AdvertisementHandle};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicNotify,
    CharacteristicNotifyMethod, CharacteristicWrite, CharacteristicWriteMethod, ReqError, Service,
};
use bluer::Session;
use futures_util::FutureExt;
use tokio::task::JoinHandle;

use super::BleConfig;
use crate::log_system;
use crate::transport::{OnFrame, Settings};

/// notifier 失效巡检间隔
const NOTIFY_POLL: Duration = Duration::from_millis(200);

type Notifier = bluer::gatt::local::CharacteristicNotifier;

struct BusHandles {
    _app: ApplicationHandle,
    _adv: AdvertisementHandle,
    _session: Session,
}

pub struct PeripheralEngine {
    cfg: BleConfig,
    started: AtomicBool,
    running: AtomicBool,
    mtu_payload: AtomicUsize,
    notifying: AtomicBool,
    on_frame: Mutex<Option<OnFrame>>,
    notifier: tokio::sync::Mutex<Option<Notifier>>,
    handles: Mutex<Option<BusHandles>>,
    task: Mutex<Option<JoinHandle<()>>>,
    stop_wake: tokio::sync::Notify,
}

impl PeripheralEngine {
    pub fn new(cfg: BleConfig) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            started: AtomicBool::new(false),
            running: AtomicBool::new(false),
            mtu_payload: AtomicUsize::new(0),
            notifying: AtomicBool::new(false),
            on_frame: Mutex::new(None),
            notifier: tokio::sync::Mutex::new(None),
            handles: Mutex::new(None),
            task: Mutex::new(None),
            stop_wake: tokio::sync::Notify::new(),
        })
    }

    pub async fn start(self: &Arc<Self>, settings: Settings, on_frame: OnFrame) -> anyhow::Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            log::debug!("[peripheral] start: already running");
            return Ok(());
        }
        self.mtu_payload.store(settings.mtu_payload, Ordering::SeqCst);
        *self.on_frame.lock().expect("on_frame lock") = Some(on_frame);

        match self.start_inner().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn start_inner(self: &Arc<Self>) -> anyhow::Result<()> {
        let session = Session::new().await.context("opening BlueZ session")?;
        let adapter = session
            .adapter(&self.cfg.adapter)
            .with_context(|| format!("adapter {} not found", self.cfg.adapter))?;
        adapter.set_powered(true).await.context("powering adapter")?;

        let app = self.build_application();
        let app_handle = adapter
            .serve_gatt_application(app)
            .await
            .context("RegisterApplication failed")?;
        log::debug!(
            "[peripheral] GATT app registered: svc={} tx={} rx={}",
            self.cfg.service_uuid,
            self.cfg.tx_uuid,
            self.cfg.rx_uuid
        );

        let adv = Advertisement {
            service_uuids: std::iter::once(self.cfg.service_uuid).collect(),
            discoverable: Some(true),
            local_name: Some(self.cfg.local_name.clone()),
            ..Default::default()
        };
        let adv_handle = adapter
            .advertise(adv)
            .await
            .context("RegisterAdvertisement failed")?;
        log_system!(
            "[peripheral] LE advertisement registered (adapter={}, name='{}')",
            adapter.name(),
            self.cfg.local_name
        );

        *self.handles.lock().expect("handles lock") = Some(BusHandles {
            _app: app_handle,
            _adv: adv_handle,
            _session: session,
        });

        self.running.store(true, Ordering::SeqCst);
        let engine = self.clone();
        let handle = tokio::spawn(async move { engine.run().await });
        *self.task.lock().expect("task lock") = Some(handle);
        Ok(())
    }

    fn build_application(self: &Arc<Self>) -> Application {
        let weak_rx = Arc::downgrade(self);
        let weak_tx = Arc::downgrade(self);

        let rx_char = Characteristic {
            uuid: self.cfg.rx_uuid,
            write: Some(CharacteristicWrite {
                write: true,
                write_without_response: true,
                method: CharacteristicWriteMethod::Fun(Box::new(move |new_value, req| {
                    let weak = weak_rx.clone();
                    async move {
                        if req.offset != 0 {
                            log::warn!("[peripheral] rx.WriteValue rejected offset={}", req.offset);
                            return Err(ReqError::NotSupported);
                        }
                        log::debug!("[peripheral] rx.WriteValue len={}", new_value.len());
                        if let Some(engine) = weak.upgrade() {
                            engine.deliver(&new_value);
                        }
                        Ok(())
                    }
                    .boxed()
                })),
                ..Default::default()
            }),
            ..Default::default()
        };

        let tx_char = Characteristic {
            uuid: self.cfg.tx_uuid,
            notify: Some(CharacteristicNotify {
                notify: true,
                method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
                    let weak = weak_tx.clone();
                    async move {
                        let Some(engine) = weak.upgrade() else { return };
                        *engine.notifier.lock().await = Some(notifier);
                        engine.notifying.store(true, Ordering::SeqCst);
                        log_system!("[peripheral] central subscribed (StartNotify)");
                    }
                    .boxed()
                })),
                ..Default::default()
            }),
            ..Default::default()
        };

        Application {
            services: vec![Service {
                uuid: self.cfg.service_uuid,
                primary: true,
                characteristics: vec![tx_char, rx_char],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    /// 巡检任务：central 退订后把 `notifying` 拉回 false
    async fn run(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = self.stop_wake.notified() => break,
                _ = tokio::time::sleep(NOTIFY_POLL) => {}
            }
            let mut guard = self.notifier.lock().await;
            if let Some(n) = guard.as_ref() {
                if n.is_stopped() {
                    *guard = None;
                    self.notifying.store(false, Ordering::SeqCst);
                    log_system!("[peripheral] central unsubscribed (StopNotify)");
                }
            }
        }
    }

    fn deliver(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let cb = self.on_frame.lock().expect("on_frame lock").clone();
        if let Some(cb) = cb {
            cb(bytes);
        }
    }

    /// 经 notify 推送一帧；Notifying=false 时直接拒绝
    pub async fn send(&self, frame: &[u8]) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        if !self.notifying.load(Ordering::SeqCst) {
            log::debug!("[peripheral] drop send (Notifying=false)");
            return false;
        }
        let mtu = self.mtu_payload.load(Ordering::SeqCst);
        if mtu != 0 && frame.len() > mtu {
            log::warn!("[peripheral] send len={} > mtu_payload={}", frame.len(), mtu);
            return false;
        }

        let mut guard = self.notifier.lock().await;
        let Some(notifier) = guard.as_mut() else {
            return false;
        };
        match notifier.notify(frame.to_vec()).await {
            Ok(()) => {
                log::debug!("[peripheral] notify len={} sent", frame.len());
                true
            }
            Err(err) => {
                log::warn!("[peripheral] notify send failed: {}", err);
                *guard = None;
                self.notifying.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    pub fn link_ready(&self) -> bool {
        self.notifying.load(Ordering::SeqCst)
    }

    /// 注销广播与应用（句柄随 drop 释放），停掉巡检任务
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.running.store(false, Ordering::SeqCst);
        self.stop_wake.notify_waiters();

        let task = self.task.lock().expect("task lock").take();
        if let Some(t) = task {
            let _ = t.await;
        }

        *self.notifier.lock().await = None;
        self.notifying.store(false, Ordering::SeqCst);
        let handles = self.handles.lock().expect("handles lock").take();
        drop(handles);
        *self.on_frame.lock().expect("on_frame lock") = None;
        log::info!("[peripheral] stopped");
    }
}
