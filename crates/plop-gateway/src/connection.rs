use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use plop_types::Message;

use crate::offline::FlushOutcome;
use crate::presence::{Connection, OUTBOUND_BUFFER};
use crate::router::MessageRouter;
use crate::store::blocking;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_MISSED_PONGS: u8 = 2;

/// Drive one WebSocket connection for `user_id` until either side closes.
pub async fn handle_connection(
    socket: WebSocket,
    router: MessageRouter,
    user_id: String,
    pseudo: Option<String>,
) {
    let (mut sender, mut receiver) = socket.split();
    let (conn, mut outbound) = Connection::open(OUTBOUND_BUFFER);
    let conn_id = conn.id();

    info!("{} ({}) connected to gateway", user_id, conn_id);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // The writer must be running before registration so the flush and any
    // concurrent deliveries have somewhere to drain.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_pongs: u8 = 0;

        loop {
            tokio::select! {
                next = outbound.recv() => {
                    let Some(msg) = next else { break };
                    let text = match serde_json::to_string(&msg) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to encode outbound '{}': {}", msg.kind.as_str(), e);
                            continue;
                        }
                    };
                    if sender.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_pongs = 0;
                    } else {
                        missed_pongs += 1;
                        if missed_pongs >= MAX_MISSED_PONGS {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_pongs);
                            break;
                        }
                    }
                    if sender.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    open_session(&router, &user_id, &conn, pseudo).await;

    let router_recv = router.clone();
    let user_recv = user_id.clone();
    let conn_recv = conn.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = receiver.next().await {
            match frame {
                WsMessage::Text(text) => {
                    router_recv
                        .handle_frame(&user_recv, &conn_recv, text.as_str())
                        .await;
                }
                WsMessage::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    close_session(&router, &user_id, &conn).await;
    info!("{} ({}) disconnected from gateway", user_id, conn_id);
}

/// Register a new device and start its connect-time work: the pending flush
/// to this device, a sync request to the user's other devices, and saving the
/// pseudo hint. Only registration is awaited.
pub async fn open_session(
    router: &MessageRouter,
    user_id: &str,
    conn: &Connection,
    pseudo: Option<String>,
) {
    let had_others = router.presence().register(user_id, conn.clone()).await;

    let flush_router = router.clone();
    let flush_user = user_id.to_string();
    let flush_conn = conn.clone();
    tokio::spawn(async move {
        match flush_router.offline().flush(&flush_user, &flush_conn).await {
            Ok(FlushOutcome::Empty) => debug!("Nothing pending for {}", flush_user),
            Ok(outcome) => debug!("Flush for {} ({}): {:?}", flush_user, flush_conn.id(), outcome),
            Err(e) => error!("Pending flush for {} failed: {:#}", flush_user, e),
        }
    });

    if had_others {
        let n = router
            .presence()
            .send_to_user(user_id, &Message::sync_request(), Some(conn.id()))
            .await;
        info!("Asked {} other device(s) of {} to sync", n, user_id);
    }

    if let Some(pseudo) = pseudo.filter(|p| !p.trim().is_empty()) {
        let pseudos = router.pseudos();
        let user = user_id.to_string();
        tokio::spawn(async move {
            let (u, p) = (user.clone(), pseudo.clone());
            if let Err(e) = blocking(move || pseudos.save_pseudo(&u, &p)).await {
                error!("Failed to save pseudo for {}: {:#}", user, e);
            }
        });
    }
}

/// Release the device's registry entry.
pub async fn close_session(router: &MessageRouter, user_id: &str, conn: &Connection) {
    if !router.presence().unregister(user_id, conn.id()).await {
        debug!("{} for {} was already unregistered", conn.id(), user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RouteOutcome;
    use crate::router::tests::Harness;
    use crate::store::{OfflineQueue, PseudoStore};
    use plop_types::MessageType;
    use tokio::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(2);

    async fn recv_within(rx: &mut mpsc::Receiver<Message>, timeout: Duration) -> Option<Message> {
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    async fn connect(h: &Harness, user: &str, pseudo: Option<&str>) -> (Connection, mpsc::Receiver<Message>) {
        let (conn, rx) = Connection::open(16);
        open_session(&h.router, user, &conn, pseudo.map(str::to_string)).await;
        (conn, rx)
    }

    #[tokio::test]
    async fn offline_plop_is_flushed_on_reconnect_exactly_once() {
        let h = Harness::new(Duration::ZERO);
        let (c1, mut c1_rx) = connect(&h, "alice", None).await;
        let (_c2, mut c2_rx) = connect(&h, "alice", None).await;
        // c1 is told to sync when c2 joins
        assert_eq!(recv_within(&mut c1_rx, WAIT).await.unwrap().kind, MessageType::SyncRequest);

        let raw = r#"{"type":"plop","to":"bob","payload":{"text":"hi"}}"#;
        assert_eq!(h.router.handle_frame("alice", &c1, raw).await, RouteOutcome::Queued);

        let ack = recv_within(&mut c1_rx, WAIT).await.unwrap();
        assert_eq!(ack.kind, MessageType::MessageAck);
        assert_eq!(ack.to.as_deref(), Some("alice"));
        assert!(c2_rx.try_recv().is_err());

        h.drain_background().await;
        assert_eq!(h.db.get_all("bob").unwrap().len(), 1);
        assert_eq!(h.escalator.calls.lock().unwrap()[0].0, "bob");

        let (c3, mut c3_rx) = connect(&h, "bob", None).await;
        let got = recv_within(&mut c3_rx, WAIT).await.unwrap();
        assert_eq!(got.kind, MessageType::Plop);
        assert_eq!(got.from.as_deref(), Some("alice"));
        assert_eq!(got.to.as_deref(), Some("bob"));
        assert_eq!(got.text(), Some("hi"));
        assert!(got.is_pending);

        // The flush clears the store after writing; give it a moment.
        for _ in 0..50 {
            if h.db.get_all("bob").unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(h.db.get_all("bob").unwrap().is_empty());

        close_session(&h.router, "bob", &c3).await;
        let (_c4, mut c4_rx) = connect(&h, "bob", None).await;
        assert!(recv_within(&mut c4_rx, Duration::from_millis(200)).await.is_none());
    }

    #[tokio::test]
    async fn first_device_gets_no_sync_request() {
        let h = Harness::new(Duration::ZERO);
        let (_c1, mut rx) = connect(&h, "alice", None).await;
        assert!(recv_within(&mut rx, Duration::from_millis(200)).await.is_none());
    }

    #[tokio::test]
    async fn sync_request_skips_the_new_device() {
        let h = Harness::new(Duration::ZERO);
        let (_c1, mut c1_rx) = connect(&h, "alice", None).await;
        let (_c2, mut c2_rx) = connect(&h, "alice", None).await;

        let req = recv_within(&mut c1_rx, WAIT).await.unwrap();
        assert_eq!(req, Message::sync_request());
        assert!(recv_within(&mut c2_rx, Duration::from_millis(200)).await.is_none());
    }

    #[tokio::test]
    async fn last_close_takes_user_offline() {
        let h = Harness::new(Duration::ZERO);
        let (c1, _rx1) = connect(&h, "alice", None).await;
        let (c2, _rx2) = connect(&h, "alice", None).await;

        close_session(&h.router, "alice", &c1).await;
        assert!(h.router.presence().is_online("alice").await);
        close_session(&h.router, "alice", &c2).await;
        assert!(!h.router.presence().is_online("alice").await);
        assert_eq!(h.router.presence().online_user_count().await, 0);
    }

    #[tokio::test]
    async fn pseudo_hint_is_saved_in_background() {
        let h = Harness::new(Duration::ZERO);
        let _c = connect(&h, "alice", Some("Alice")).await;
        let _blank = connect(&h, "bob", Some("  ")).await;

        for _ in 0..50 {
            if h.db.pseudo("alice").unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(h.db.pseudo("alice").unwrap().as_deref(), Some("Alice"));
        assert_eq!(h.db.pseudo("bob").unwrap(), None);
    }
}
