//! 集成测试 - 回环传输上的整条收发管线
//!
//! 加密、分片、重组、输出门控都在进程内回环上端到端验证。

use std::sync::{Arc, Mutex};

use zeroize::Zeroizing;

use blechat_core::config::Config;
use blechat_core::crypto::aead::AeadEngine;
use blechat_core::transport::loopback::LoopbackTransport;
use blechat_core::transport::Transport;
use blechat_core::ChatService;

fn loopback_service(mtu_payload: usize, psk: [u8; 32]) -> (ChatService, Arc<Mutex<Vec<String>>>) {
    let cfg = Config {
        mtu_payload,
        ..Config::default()
    };
    let service = ChatService::with_psk(
        Transport::Loopback(LoopbackTransport::new()),
        AeadEngine::with_psk(psk),
        &cfg,
        Some(Zeroizing::new(psk)),
    );

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink_buf = received.clone();
    service.set_sink(Box::new(move |text: &str| {
        sink_buf.lock().unwrap().push(text.to_string());
    }));
    (service, received)
}

/// 短消息：单片往返
#[tokio::test]
async fn test_loopback_round_trip_short() {
    let (service, received) = loopback_service(100, [0u8; 32]);
    service.start().await.unwrap();

    assert!(service.send_text("hello, loopback!").await);

    let got = received.lock().unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0], "hello, loopback!");
    drop(got);
    service.stop().await;
}

/// 4096 字节大消息在 MTU=32 下分片往返，恰好重组出一条
#[tokio::test]
async fn test_loopback_round_trip_fragmented() {
    let (service, received) = loopback_service(32, [0u8; 32]);
    service.start().await.unwrap();

    let big = "X".repeat(4096);
    assert!(service.send_text(&big).await);

    let got = received.lock().unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0], big);
    drop(got);
    service.stop().await;
}

/// 多条消息各自独立重组
#[tokio::test]
async fn test_loopback_multiple_messages() {
    let (service, received) = loopback_service(48, [9u8; 32]);
    service.start().await.unwrap();

    for i in 0..5 {
        assert!(service.send_text(&format!("message #{i}")).await);
    }

    let got = received.lock().unwrap();
    assert_eq!(got.len(), 5);
    for (i, text) in got.iter().enumerate() {
        assert_eq!(text, &format!("message #{i}"));
    }
}

/// TAIL 关闭时消息被丢弃，重新打开后恢复输出
#[tokio::test]
async fn test_tail_gates_delivery() {
    let (service, received) = loopback_service(100, [1u8; 32]);
    service.start().await.unwrap();

    service.set_tail(false);
    assert!(service.send_text("dropped").await);
    assert!(received.lock().unwrap().is_empty());

    service.set_tail(true);
    assert!(service.send_text("visible").await);
    let got = received.lock().unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0], "visible");
}

/// 未启动时发送失败；启动后成功；停止后再次失败
#[tokio::test]
async fn test_send_requires_started_transport() {
    let (service, _received) = loopback_service(100, [0u8; 32]);
    assert!(!service.send_text("too early").await);

    service.start().await.unwrap();
    assert!(service.send_text("ok").await);

    service.stop().await;
    assert!(!service.send_text("too late").await);
}

/// 非 UTF-8 收包也不会 panic（lossy 输出）
#[tokio::test]
async fn test_loopback_handles_binary_text() {
    let (service, received) = loopback_service(100, [0u8; 32]);
    service.start().await.unwrap();

    let mixed = String::from_utf8(vec![b'a', b'b', b'c']).unwrap();
    assert!(service.send_text(&mixed).await);
    assert_eq!(received.lock().unwrap().len(), 1);
}
